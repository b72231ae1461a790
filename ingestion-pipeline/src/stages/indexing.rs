use common::{
    error::AppError,
    storage::types::{
        git_file::GitFile,
        snippet::{Snippet, SnippetCandidate, SnippetSource},
        task_status::TaskStatus,
    },
};
use retrieval_pipeline::{fts, vector, vector::EmbeddingTable};

use crate::pipeline::IngestionPipeline;
use crate::snippets::{is_example_path, is_indexable, split_content};
use crate::stages::examples::is_example_snippet;
use crate::stages::{StageKind, StageOutcome, StagePayload};

/// Read the commit's indexable files and upsert their content-addressed
/// snippets. Example directories are left to the example extractor.
pub async fn extract_snippets(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;
    let (repository, clone_path) = ctx
        .require_cloned_repository(&payload.repository_id)
        .await?;

    let files: Vec<GitFile> = GitFile::list_for_commit(&ctx.db, commit_sha)
        .await?
        .into_iter()
        .filter(|file| is_indexable(file) && !is_example_path(&file.path))
        .collect();
    if files.is_empty() {
        return Ok(StageOutcome::Skipped("no indexable files".into()));
    }

    let status_id = StageKind::ExtractSnippets.status_id(payload);
    let total = files.len() as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let mut candidates = Vec::new();
    for (index, file) in files.iter().enumerate() {
        let content = ctx
            .services
            .scanner
            .read_file(&clone_path, commit_sha, &file.path)
            .await
            .map_err(|err| err.with_operation("read file for snippet extraction"))?;
        if let Some(content) = content {
            for chunk in split_content(&content) {
                candidates.push(SnippetCandidate {
                    content: chunk,
                    extension: file.extension.clone(),
                    source: SnippetSource {
                        commit_sha: commit_sha.to_string(),
                        path: file.path.clone(),
                        blob_sha: file.blob_sha.clone(),
                        repository_id: repository.id.clone(),
                    },
                });
            }
        }
        TaskStatus::set_progress(&ctx.db, &status_id, index as u64 + 1, total).await?;
    }

    if candidates.is_empty() {
        return Ok(StageOutcome::Skipped("no readable file contents".into()));
    }

    let count = candidates.len();
    let ids = Snippet::upsert_batch(&ctx.db, candidates).await?;
    let unique: std::collections::BTreeSet<&String> = ids.iter().collect();

    Ok(StageOutcome::Completed(format!(
        "extracted {count} snippet chunks ({} unique) from {} files",
        unique.len(),
        files.len()
    )))
}

/// Feed the commit's snippets into the keyword index.
pub async fn create_bm25_index(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let snippets = Snippet::list_by_commit(&ctx.db, commit_sha).await?;
    if snippets.is_empty() {
        return Ok(StageOutcome::Skipped("no snippets for this commit".into()));
    }

    let status_id = StageKind::CreateBm25Index.status_id(payload);
    TaskStatus::set_progress(&ctx.db, &status_id, 0, snippets.len() as u64).await?;

    let documents: Vec<(String, String)> = snippets
        .into_iter()
        .map(|snippet| (snippet.id, snippet.content))
        .collect();
    let total = documents.len() as u64;
    let indexed = fts::index_documents(&ctx.db, documents).await?;
    TaskStatus::set_progress(&ctx.db, &status_id, total, total).await?;

    Ok(StageOutcome::Completed(format!(
        "indexed {indexed} snippet passages"
    )))
}

/// Embed snippet contents into the code vector table.
pub async fn create_code_embeddings(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let snippets: Vec<Snippet> = Snippet::list_by_commit(&ctx.db, commit_sha)
        .await?
        .into_iter()
        .filter(|snippet| !is_example_snippet(snippet))
        .collect();
    if snippets.is_empty() {
        return Ok(StageOutcome::Skipped("no snippets to embed".into()));
    }

    let status_id = StageKind::CreateCodeEmbeddings.status_id(payload);
    let total = snippets.len() as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let texts: Vec<String> = snippets.iter().map(|s| s.content.clone()).collect();
    let vectors = ctx
        .services
        .code_embedder
        .embed_batch(texts)
        .await
        .map_err(|err| err.with_operation("embed snippet contents"))?;

    let dimension = ctx.services.code_embedder.dimension();
    let rows: Vec<(String, Vec<f32>)> = snippets
        .iter()
        .map(|snippet| snippet.id.clone())
        .zip(vectors)
        .collect();
    vector::save_all(&ctx.db, EmbeddingTable::Code, rows, dimension).await?;
    TaskStatus::set_progress(&ctx.db, &status_id, total, total).await?;

    Ok(StageOutcome::Completed(format!(
        "embedded {} snippets",
        snippets.len()
    )))
}
