use common::{
    error::AppError,
    storage::types::{
        enrichment::{Enrichment, EnrichmentSubtype, EnrichmentType},
        enrichment_association::EntityKind,
        git_commit::GitCommit,
        git_file::GitFile,
        snippet::Snippet,
        task_status::TaskStatus,
    },
};
use retrieval_pipeline::{vector, vector::EmbeddingTable};

use crate::enricher::{EnrichOptions, EnrichmentRequest};
use crate::pipeline::IngestionPipeline;
use crate::stages::examples::is_example_snippet;
use crate::stages::{StageKind, StageOutcome, StagePayload};
use crate::utils::llm_instructions::{
    API_DOCS_SYSTEM_PROMPT, ARCHITECTURE_SYSTEM_PROMPT, COMMIT_DESCRIPTION_SYSTEM_PROMPT,
    COOKBOOK_SYSTEM_PROMPT, DATABASE_SCHEMA_SYSTEM_PROMPT, SNIPPET_SUMMARY_SYSTEM_PROMPT,
};

/// Upper bound on prompt material sent to single-shot enrichment stages.
const MAX_PROMPT_CHARS: usize = 12_000;

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}

async fn has_enrichment(
    ctx: &IngestionPipeline,
    entity_type: EntityKind,
    entity_id: &str,
    enrichment_type: EnrichmentType,
    subtype: EnrichmentSubtype,
) -> Result<bool, AppError> {
    let existing = Enrichment::list_for_entity(
        &ctx.db,
        entity_type,
        entity_id,
        Some(enrichment_type),
        Some(subtype),
    )
    .await?;
    Ok(!existing.is_empty())
}

fn enrich_options(ctx: &IngestionPipeline) -> EnrichOptions {
    EnrichOptions {
        max_failure_rate: ctx.config.max_failure_rate,
        parallelism: ctx.config.enrichment_parallelism,
        on_progress: None,
    }
}

/// Summarize every snippet of the commit that has no summary yet; each
/// summary attaches to its snippet and to the commit.
pub async fn create_summary_enrichment(
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
        return Ok(StageOutcome::Skipped("no snippets for this commit".into()));
    }

    let mut requests = Vec::new();
    for snippet in &snippets {
        let summarized = has_enrichment(
            ctx,
            EntityKind::Snippet,
            &snippet.id,
            EnrichmentType::Usage,
            EnrichmentSubtype::SnippetSummary,
        )
        .await?;
        if !summarized {
            requests.push(EnrichmentRequest {
                id: snippet.id.clone(),
                text: snippet.content.clone(),
                system_prompt: SNIPPET_SUMMARY_SYSTEM_PROMPT.to_string(),
            });
        }
    }
    if requests.is_empty() {
        return Ok(StageOutcome::Skipped(
            "all snippets already summarized".into(),
        ));
    }

    let status_id = StageKind::CreateSummaryEnrichment.status_id(payload);
    let total = requests.len() as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let responses = ctx
        .enricher
        .enrich(requests, &enrich_options(ctx))
        .await
        .map_err(|err| err.with_operation("snippet summaries"))?;

    let summarized = responses.len();
    for response in responses {
        Enrichment::create_with_associations(
            &ctx.db,
            Enrichment::new(
                EnrichmentType::Usage,
                EnrichmentSubtype::SnippetSummary,
                response.text,
            ),
            vec![
                (EntityKind::Snippet, response.id),
                (EntityKind::GitCommits, commit_sha.to_string()),
            ],
        )
        .await?;
    }
    TaskStatus::set_progress(&ctx.db, &status_id, summarized as u64, total).await?;

    Ok(StageOutcome::Completed(format!(
        "summarized {summarized} snippets"
    )))
}

/// Embed snippet summaries into the text vector table, keyed by snippet id.
pub async fn create_summary_embeddings(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let snippets = Snippet::list_by_commit(&ctx.db, commit_sha).await?;
    let mut pending: Vec<(String, String)> = Vec::new();
    for snippet in &snippets {
        let summaries = Enrichment::list_for_entity(
            &ctx.db,
            EntityKind::Snippet,
            &snippet.id,
            Some(EnrichmentType::Usage),
            Some(EnrichmentSubtype::SnippetSummary),
        )
        .await?;
        if let Some(summary) = summaries.into_iter().next() {
            pending.push((snippet.id.clone(), summary.content));
        }
    }
    if pending.is_empty() {
        return Ok(StageOutcome::Skipped("no summaries to embed".into()));
    }

    let status_id = StageKind::CreateSummaryEmbeddings.status_id(payload);
    let total = pending.len() as u64;
    TaskStatus::set_progress(&ctx.db, &status_id, 0, total).await?;

    let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    let vectors = ctx
        .services
        .text_embedder
        .embed_batch(texts)
        .await
        .map_err(|err| err.with_operation("embed snippet summaries"))?;

    let dimension = ctx.services.text_embedder.dimension();
    let rows: Vec<(String, Vec<f32>)> = pending
        .into_iter()
        .map(|(id, _)| id)
        .zip(vectors)
        .collect();
    let count = rows.len();
    vector::save_all(&ctx.db, EmbeddingTable::Text, rows, dimension).await?;
    TaskStatus::set_progress(&ctx.db, &status_id, count as u64, total).await?;

    Ok(StageOutcome::Completed(format!(
        "embedded {count} snippet summaries"
    )))
}

/// One changelog-style paragraph per commit, attached to the commit.
pub async fn create_commit_description(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;
    let commit = GitCommit::require(&ctx.db, commit_sha).await?;

    let described = has_enrichment(
        ctx,
        EntityKind::GitCommits,
        commit_sha,
        EnrichmentType::Development,
        EnrichmentSubtype::CommitDescription,
    )
    .await?;
    if described {
        return Ok(StageOutcome::Skipped("commit already described".into()));
    }

    let files = GitFile::list_for_commit(&ctx.db, commit_sha).await?;
    let file_list: Vec<String> = files.iter().map(|file| file.path.clone()).collect();
    let input = format!(
        "Commit message:\n{}\n\nFiles:\n{}",
        commit.message,
        file_list.join("\n")
    );

    let description = ctx
        .services
        .generator
        .generate(COMMIT_DESCRIPTION_SYSTEM_PROMPT, &clip(&input, MAX_PROMPT_CHARS))
        .await
        .map_err(|err| err.with_operation("commit description"))?;

    Enrichment::create_with_associations(
        &ctx.db,
        Enrichment::new(
            EnrichmentType::Development,
            EnrichmentSubtype::CommitDescription,
            description,
        ),
        vec![(EntityKind::GitCommits, commit_sha.to_string())],
    )
    .await?;

    Ok(StageOutcome::Completed("commit described".into()))
}

/// Describe the repository layout from the commit's file tree; attaches to
/// both the commit and the repository.
pub async fn create_architecture_enrichment(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let files = GitFile::list_for_commit(&ctx.db, commit_sha).await?;
    if files.is_empty() {
        return Ok(StageOutcome::Skipped("no files for this commit".into()));
    }

    let described = has_enrichment(
        ctx,
        EntityKind::GitCommits,
        commit_sha,
        EnrichmentType::Architecture,
        EnrichmentSubtype::Physical,
    )
    .await?;
    if described {
        return Ok(StageOutcome::Skipped(
            "architecture already described".into(),
        ));
    }

    let tree: Vec<String> = files.iter().map(|file| file.path.clone()).collect();
    let outline = ctx
        .services
        .generator
        .generate(
            ARCHITECTURE_SYSTEM_PROMPT,
            &clip(&tree.join("\n"), MAX_PROMPT_CHARS),
        )
        .await
        .map_err(|err| err.with_operation("architecture enrichment"))?;

    Enrichment::create_with_associations(
        &ctx.db,
        Enrichment::new(
            EnrichmentType::Architecture,
            EnrichmentSubtype::Physical,
            outline,
        ),
        vec![
            (EntityKind::GitCommits, commit_sha.to_string()),
            (EntityKind::GitRepos, payload.repository_id.clone()),
        ],
    )
    .await?;

    Ok(StageOutcome::Completed("architecture described".into()))
}

/// How-to entries distilled from the commit's snippets.
pub async fn create_cookbook(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;

    let snippets = Snippet::list_by_commit(&ctx.db, commit_sha).await?;
    if snippets.is_empty() {
        return Ok(StageOutcome::Skipped("no snippets for this commit".into()));
    }

    let written = has_enrichment(
        ctx,
        EntityKind::GitCommits,
        commit_sha,
        EnrichmentType::Usage,
        EnrichmentSubtype::Cookbook,
    )
    .await?;
    if written {
        return Ok(StageOutcome::Skipped("cookbook already written".into()));
    }

    let corpus = snippet_corpus(&snippets);
    let cookbook = ctx
        .services
        .generator
        .generate(COOKBOOK_SYSTEM_PROMPT, &clip(&corpus, MAX_PROMPT_CHARS))
        .await
        .map_err(|err| err.with_operation("cookbook"))?;

    Enrichment::create_with_associations(
        &ctx.db,
        Enrichment::new(EnrichmentType::Usage, EnrichmentSubtype::Cookbook, cookbook),
        vec![(EntityKind::GitCommits, commit_sha.to_string())],
    )
    .await?;

    Ok(StageOutcome::Completed("cookbook written".into()))
}

/// Public API documentation extracted from the commit's snippets.
pub async fn create_public_api_docs(
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
        return Ok(StageOutcome::Skipped("no snippets for this commit".into()));
    }

    let documented = has_enrichment(
        ctx,
        EntityKind::GitCommits,
        commit_sha,
        EnrichmentType::Development,
        EnrichmentSubtype::ApiDocs,
    )
    .await?;
    if documented {
        return Ok(StageOutcome::Skipped("api docs already written".into()));
    }

    let corpus = snippet_corpus(&snippets);
    let docs = ctx
        .services
        .generator
        .generate(API_DOCS_SYSTEM_PROMPT, &clip(&corpus, MAX_PROMPT_CHARS))
        .await
        .map_err(|err| err.with_operation("public api docs"))?;

    Enrichment::create_with_associations(
        &ctx.db,
        Enrichment::new(EnrichmentType::Development, EnrichmentSubtype::ApiDocs, docs),
        vec![(EntityKind::GitCommits, commit_sha.to_string())],
    )
    .await?;

    Ok(StageOutcome::Completed("api docs written".into()))
}

/// Document schema and migration sources, when the commit has any.
pub async fn create_database_schema(
    ctx: &IngestionPipeline,
    payload: &StagePayload,
) -> Result<StageOutcome, AppError> {
    let commit_sha = ctx.require_commit_sha(payload)?;
    let (_repository, clone_path) = ctx
        .require_cloned_repository(&payload.repository_id)
        .await?;

    let schema_files: Vec<GitFile> = GitFile::list_for_commit(&ctx.db, commit_sha)
        .await?
        .into_iter()
        .filter(|file| {
            file.extension == "sql"
                || file.path.contains("migrations/")
                || file.path.to_ascii_lowercase().contains("schema")
        })
        .collect();
    if schema_files.is_empty() {
        return Ok(StageOutcome::Skipped("no schema sources".into()));
    }

    let documented = has_enrichment(
        ctx,
        EntityKind::GitCommits,
        commit_sha,
        EnrichmentType::Architecture,
        EnrichmentSubtype::DatabaseSchema,
    )
    .await?;
    if documented {
        return Ok(StageOutcome::Skipped("schema already documented".into()));
    }

    let mut sources = String::new();
    for file in &schema_files {
        let content = ctx
            .services
            .scanner
            .read_file(&clone_path, commit_sha, &file.path)
            .await
            .map_err(|err| err.with_operation("read schema source"))?;
        if let Some(content) = content {
            sources.push_str(&format!("-- {}\n{content}\n", file.path));
        }
    }
    if sources.is_empty() {
        return Ok(StageOutcome::Skipped("schema sources unreadable".into()));
    }

    let documentation = ctx
        .services
        .generator
        .generate(
            DATABASE_SCHEMA_SYSTEM_PROMPT,
            &clip(&sources, MAX_PROMPT_CHARS),
        )
        .await
        .map_err(|err| err.with_operation("database schema"))?;

    Enrichment::create_with_associations(
        &ctx.db,
        Enrichment::new(
            EnrichmentType::Architecture,
            EnrichmentSubtype::DatabaseSchema,
            documentation,
        ),
        vec![(EntityKind::GitCommits, commit_sha.to_string())],
    )
    .await?;

    Ok(StageOutcome::Completed(format!(
        "documented {} schema sources",
        schema_files.len()
    )))
}

fn snippet_corpus(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .take(20)
        .map(|snippet| {
            let path = snippet
                .derives_from
                .first()
                .map(|source| source.path.as_str())
                .unwrap_or("unknown");
            format!("// {path}\n{}", snippet.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
