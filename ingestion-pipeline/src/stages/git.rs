use common::{
    error::AppError,
    storage::types::{
        git_branch::GitBranch, git_commit::GitCommit, git_file::GitFile, git_tag::GitTag,
        repository::Repository, task_status::TaskStatus,
    },
};

use crate::pipeline::IngestionPipeline;
use crate::stages::{StageKind, StageOutcome, StagePayload};

/// Clone the remote (or refresh an existing clone) and record the clone path.
pub async fn clone_repository(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let repository = Repository::require(&ctx.db, &payload.repository_id).await?;
    let destination = ctx.config.clone_root.join(&repository.id);

    ctx.services
        .scanner
        .clone_or_open(&repository.remote_uri, &destination)
        .await
        .map_err(|err| err.with_operation("clone repository"))?;

    Repository::set_clone_path(&ctx.db, &repository.id, &destination.to_string_lossy()).await?;

    Ok(StageOutcome::Completed(format!(
        "cloned {} into {}",
        repository.sanitized_uri,
        destination.display()
    )))
}

/// Resolve the tracked ref, persist commits/refs/files, and fan out the
/// per-commit pipeline for the tracked commit.
pub async fn scan_repository(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let (repository, clone_path) = ctx
        .require_cloned_repository(&payload.repository_id)
        .await?;

    let scan = ctx
        .services
        .scanner
        .scan(&clone_path, &repository.tracking)
        .await
        .map_err(|err| err.with_operation("scan repository"))?;

    let status_id = StageKind::Scan.status_id(payload);
    let total = (scan.commits.len() + scan.branches.len() + scan.tags.len() + scan.files.len())
        as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let commits: Vec<GitCommit> = scan
        .commits
        .iter()
        .map(|commit| {
            GitCommit::new(
                &commit.sha,
                &repository.id,
                commit.parent_sha.clone(),
                commit.author.clone(),
                commit.authored_at,
                commit.message.clone(),
            )
        })
        .collect::<Result<_, _>>()?;
    let num_commits = commits.len() as u64;
    GitCommit::store_ignore(&ctx.db, commits).await?;
    let mut done = num_commits;
    TaskStatus::set_progress(&ctx.db, &status_id, done, total).await?;

    for branch in &scan.branches {
        GitBranch::upsert_ref(&ctx.db, &repository.id, &branch.name, &branch.sha).await?;
    }
    for tag in &scan.tags {
        GitTag::upsert_ref(&ctx.db, &repository.id, &tag.name, &tag.sha).await?;
    }
    done += (scan.branches.len() + scan.tags.len()) as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, done, total).await?;

    let files: Vec<GitFile> = scan
        .files
        .iter()
        .map(|file| {
            let mime_type = mime_guess::from_path(&file.path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            GitFile::new(
                &scan.tracked_sha,
                &file.path,
                &file.blob_sha,
                &mime_type,
                file.size,
            )
        })
        .collect();
    GitFile::store_ignore(&ctx.db, files).await?;
    TaskStatus::set_progress(&ctx.db, &status_id, total, total).await?;

    Repository::update_counts(
        &ctx.db,
        &repository.id,
        num_commits,
        scan.branches.len() as u64,
        scan.tags.len() as u64,
    )
    .await?;

    // Only the scan knows which commit the tracking config resolved to, so
    // the per-commit roots are enqueued here rather than via dependents().
    let commit_payload = StagePayload::commit(&repository.id, &scan.tracked_sha);
    for stage in StageKind::commit_roots() {
        ctx.enqueue_stage(stage, &commit_payload).await?;
    }

    Ok(StageOutcome::Completed(format!(
        "tracked commit {}: {} commits, {} branches, {} tags, {} files",
        scan.tracked_sha,
        num_commits,
        scan.branches.len(),
        scan.tags.len(),
        scan.files.len()
    )))
}
