use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        enrichment::Enrichment, enrichment_association::EntityKind, git_branch::GitBranch,
        git_commit::GitCommit, git_file::GitFile, git_tag::GitTag, repository::Repository,
        snippet::Snippet, task_status::TaskStatus, StoredObject,
    },
};
use retrieval_pipeline::{fts, vector, vector::EmbeddingTable};

use crate::pipeline::IngestionPipeline;
use crate::stages::{StageKind, StageOutcome, StagePayload};

/// Tear down a repository: index rows for its now-orphaned snippets first,
/// then the snippets themselves, then the git tree and its statuses.
pub async fn delete_repository(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let repository = match Repository::require(&ctx.db, &payload.repository_id).await {
        Ok(repository) => repository,
        Err(AppError::NotFound(_)) => {
            return Ok(StageOutcome::Skipped("repository already deleted".into()));
        }
        Err(err) => return Err(err),
    };

    let commits = GitCommit::list_for_repository(&ctx.db, &repository.id).await?;
    let commit_shas: Vec<String> = commits.iter().map(|commit| commit.id.clone()).collect();

    let mut orphaned = Vec::new();
    for sha in &commit_shas {
        orphaned.extend(Snippet::delete_for_commit(&ctx.db, sha).await?);
    }

    fts::delete(&ctx.db, orphaned.clone()).await?;
    vector::delete(&ctx.db, EmbeddingTable::Code, orphaned.clone()).await?;
    vector::delete(&ctx.db, EmbeddingTable::Text, orphaned.clone()).await?;
    Enrichment::delete_for_entities(&ctx.db, EntityKind::Snippet, orphaned.clone()).await?;

    Enrichment::delete_for_entities(&ctx.db, EntityKind::GitCommits, commit_shas.clone()).await?;
    GitFile::delete_for_commits(&ctx.db, commit_shas.clone()).await?;
    GitCommit::delete_for_repository(&ctx.db, &repository.id).await?;
    GitBranch::delete_for_repository(&ctx.db, &repository.id).await?;
    GitTag::delete_for_repository(&ctx.db, &repository.id).await?;
    Enrichment::delete_for_entities(&ctx.db, EntityKind::GitRepos, vec![repository.id.clone()])
        .await?;

    // Clear every status row of the repository except this stage's own, which
    // still has to reach its terminal state.
    let own_status_id = StageKind::DeleteRepository.status_id(payload);
    ctx.db
        .query(
            "DELETE type::table($table) WHERE trackable_type = $trackable_type \
             AND trackable_id = $trackable_id AND id != type::thing($table, $keep)",
        )
        .bind(("table", TaskStatus::table_name()))
        .bind(("trackable_type", "repository"))
        .bind(("trackable_id", repository.id.clone()))
        .bind(("keep", own_status_id))
        .await?
        .check()?;

    ctx.db.delete_item::<Repository>(&repository.id).await?;

    info!(
        repository_id = %repository.id,
        commits = commit_shas.len(),
        orphaned_snippets = orphaned.len(),
        "repository deleted"
    );

    Ok(StageOutcome::Completed(format!(
        "deleted {} commits and {} orphaned snippets",
        commit_shas.len(),
        orphaned.len()
    )))
}
