use common::{
    error::AppError,
    storage::types::{
        enrichment::{Enrichment, EnrichmentSubtype, EnrichmentType},
        enrichment_association::EntityKind,
        git_file::GitFile,
        snippet::{Snippet, SnippetCandidate, SnippetSource},
        task_status::TaskStatus,
    },
};
use retrieval_pipeline::{vector, vector::EmbeddingTable};

use crate::enricher::{EnrichOptions, EnrichmentRequest};
use crate::pipeline::IngestionPipeline;
use crate::snippets::{is_example_path, is_indexable, split_content};
use crate::stages::{StageKind, StageOutcome, StagePayload};
use crate::utils::llm_instructions::EXAMPLE_SUMMARY_SYSTEM_PROMPT;

/// A snippet is an example when every file it derives from lives under an
/// example directory.
pub fn is_example_snippet(snippet: &Snippet) -> bool {
    !snippet.derives_from.is_empty()
        && snippet
            .derives_from
            .iter()
            .all(|source| is_example_path(&source.path))
}

async fn example_snippets(
    ctx: &IngestionPipeline,
    commit_sha: &str,
) -> Result<Vec<Snippet>, AppError> {
    Ok(Snippet::list_by_commit(&ctx.db, commit_sha)
        .await?
        .into_iter()
        .filter(is_example_snippet)
        .collect())
}

/// Extract snippets from the commit's example directories and mark each one
/// with an `example` enrichment.
pub async fn extract_examples(
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
        .filter(|file| is_indexable(file) && is_example_path(&file.path))
        .collect();
    if files.is_empty() {
        return Ok(StageOutcome::Skipped("no example files".into()));
    }

    let status_id = StageKind::ExtractExamples.status_id(payload);
    let total = files.len() as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let mut candidates = Vec::new();
    for (index, file) in files.iter().enumerate() {
        let content = ctx
            .services
            .scanner
            .read_file(&clone_path, commit_sha, &file.path)
            .await
            .map_err(|err| err.with_operation("read example file"))?;
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
        return Ok(StageOutcome::Skipped("no readable example contents".into()));
    }

    let ids = Snippet::upsert_batch(&ctx.db, candidates).await?;

    let mut marked = 0;
    for snippet_id in &ids {
        let already_marked = !Enrichment::list_for_entity(
            &ctx.db,
            EntityKind::Snippet,
            snippet_id,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::Example),
        )
        .await?
        .is_empty();
        if already_marked {
            continue;
        }

        let path = Snippet::require(&ctx.db, snippet_id)
            .await?
            .derives_from
            .first()
            .map(|source| source.path.clone())
            .unwrap_or_default();
        Enrichment::create_with_associations(
            &ctx.db,
            Enrichment::new(
                EnrichmentType::Usage,
                EnrichmentSubtype::Example,
                format!("Usage example from `{path}`."),
            ),
            vec![
                (EntityKind::Snippet, snippet_id.clone()),
                (EntityKind::GitCommits, commit_sha.to_string()),
            ],
        )
        .await?;
        marked += 1;
    }

    Ok(StageOutcome::Completed(format!(
        "extracted {} example snippets ({marked} newly marked)",
        ids.len()
    )))
}

/// Summarize example snippets that have no summary yet. Summaries attach to
/// the snippet and to its `example` marker enrichment.
pub async fn create_example_summary(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let examples = example_snippets(ctx, commit_sha).await?;
    if examples.is_empty() {
        return Ok(StageOutcome::Skipped("no example snippets".into()));
    }

    let mut requests = Vec::new();
    for example in &examples {
        let summarized = !Enrichment::list_for_entity(
            &ctx.db,
            EntityKind::Snippet,
            &example.id,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::ExampleSummary),
        )
        .await?
        .is_empty();
        if !summarized {
            requests.push(EnrichmentRequest {
                id: example.id.clone(),
                text: example.content.clone(),
                system_prompt: EXAMPLE_SUMMARY_SYSTEM_PROMPT.to_string(),
            });
        }
    }
    if requests.is_empty() {
        return Ok(StageOutcome::Skipped(
            "all examples already summarized".into(),
        ));
    }

    let options = EnrichOptions {
        max_failure_rate: ctx.config.max_failure_rate,
        parallelism: ctx.config.enrichment_parallelism,
        on_progress: None,
    };
    let responses = ctx
        .enricher
        .enrich(requests, &options)
        .await
        .map_err(|err| err.with_operation("example summaries"))?;

    let summarized = responses.len();
    for response in responses {
        // The marker enrichment is itself a valid association target; the
        // summary hangs off both the snippet and the marker.
        let marker = Enrichment::list_for_entity(
            &ctx.db,
            EntityKind::Snippet,
            &response.id,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::Example),
        )
        .await?
        .into_iter()
        .next();

        let mut targets = vec![(EntityKind::Snippet, response.id.clone())];
        if let Some(marker) = marker {
            targets.push((EntityKind::EnrichmentsV2, marker.id));
        }
        Enrichment::create_with_associations(
            &ctx.db,
            Enrichment::new(
                EnrichmentType::Usage,
                EnrichmentSubtype::ExampleSummary,
                response.text,
            ),
            targets,
        )
        .await?;
    }

    Ok(StageOutcome::Completed(format!(
        "summarized {summarized} examples"
    )))
}

/// Embed example snippet contents into the code vector table.
pub async fn create_example_code_embeddings(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let examples = example_snippets(ctx, commit_sha).await?;
    if examples.is_empty() {
        return Ok(StageOutcome::Skipped("no example snippets".into()));
    }

    let texts: Vec<String> = examples.iter().map(|s| s.content.clone()).collect();
    let vectors = ctx
        .services
        .code_embedder
        .embed_batch(texts)
        .await
        .map_err(|err| err.with_operation("embed example contents"))?;

    let dimension = ctx.services.code_embedder.dimension();
    let count = examples.len();
    let rows: Vec<(String, Vec<f32>)> = examples
        .into_iter()
        .map(|snippet| snippet.id)
        .zip(vectors)
        .collect();
    vector::save_all(&ctx.db, EmbeddingTable::Code, rows, dimension).await?;

    Ok(StageOutcome::Completed(format!("embedded {count} examples")))
}

/// Embed example summaries into the text vector table.
pub async fn create_example_summary_embeddings(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let examples = example_snippets(ctx, commit_sha).await?;
    let mut pending: Vec<(String, String)> = Vec::new();
    for example in &examples {
        let summaries = Enrichment::list_for_entity(
            &ctx.db,
            EntityKind::Snippet,
            &example.id,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::ExampleSummary),
        )
        .await?;
        if let Some(summary) = summaries.into_iter().next() {
            pending.push((example.id.clone(), summary.content));
        }
    }
    if pending.is_empty() {
        return Ok(StageOutcome::Skipped("no example summaries to embed".into()));
    }

    let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    let vectors = ctx
        .services
        .text_embedder
        .embed_batch(texts)
        .await
        .map_err(|err| err.with_operation("embed example summaries"))?;

    let dimension = ctx.services.text_embedder.dimension();
    let rows: Vec<(String, Vec<f32>)> = pending
        .into_iter()
        .map(|(id, _)| id)
        .zip(vectors)
        .collect();
    let count = rows.len();
    vector::save_all(&ctx.db, EmbeddingTable::Text, rows, dimension).await?;

    Ok(StageOutcome::Completed(format!(
        "embedded {count} example summaries"
    )))
}
