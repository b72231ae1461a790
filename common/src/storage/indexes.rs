use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Analyzer applied to the pre-normalized token streams in `bm25_doc`.
/// Tokens arrive lowercased and ASCII-folded from the Rust normalizer, so the
/// analyzer only splits on whitespace and applies English snowball stemming.
pub const FTS_ANALYZER_NAME: &str = "code_token_analyzer";

/// Schema-level indexes: uniqueness keys and the lookups the queue, status
/// tracker and snippet associations depend on.
const SCHEMA_INDEX_STATEMENTS: [&str; 11] = [
    "DEFINE INDEX IF NOT EXISTS unique_repository_uri ON TABLE git_repos FIELDS sanitized_uri UNIQUE;",
    "DEFINE INDEX IF NOT EXISTS unique_task_dedup_key ON TABLE queue_task FIELDS dedup_key UNIQUE;",
    "DEFINE INDEX IF NOT EXISTS unique_snippet_origin ON TABLE snippet_origin FIELDS snippet_id, commit_sha, path UNIQUE;",
    "DEFINE INDEX IF NOT EXISTS unique_enrichment_association ON TABLE enrichment_association FIELDS enrichment_id, entity_type, entity_id UNIQUE;",
    "DEFINE INDEX IF NOT EXISTS idx_queue_claim ON TABLE queue_task FIELDS priority, created_at;",
    "DEFINE INDEX IF NOT EXISTS idx_status_parent ON TABLE task_status FIELDS parent;",
    "DEFINE INDEX IF NOT EXISTS idx_status_trackable ON TABLE task_status FIELDS trackable_type, trackable_id;",
    "DEFINE INDEX IF NOT EXISTS idx_origin_commit ON TABLE snippet_origin FIELDS commit_sha;",
    "DEFINE INDEX IF NOT EXISTS idx_origin_repository ON TABLE snippet_origin FIELDS repository_id;",
    "DEFINE INDEX IF NOT EXISTS idx_commit_repository ON TABLE git_commits FIELDS repository_id;",
    "DEFINE INDEX IF NOT EXISTS idx_association_entity ON TABLE enrichment_association FIELDS entity_type, entity_id;",
];

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
    options: &'static str,
}

const fn hnsw_index_specs() -> [HnswIndexSpec; 2] {
    [
        HnswIndexSpec {
            index_name: "idx_embedding_code",
            table: "code_embedding",
            options: "DIST EUCLIDEAN TYPE F32 EFC 100 M 8 CONCURRENTLY",
        },
        HnswIndexSpec {
            index_name: "idx_embedding_text",
            table: "text_embedding",
            options: "DIST EUCLIDEAN TYPE F32 EFC 100 M 8 CONCURRENTLY",
        },
    ]
}

impl HnswIndexSpec {
    fn definition_if_not_exists(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }

    fn definition_overwrite(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }
}

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
}

const fn fts_index_specs() -> [FtsIndexSpec; 1] {
    [FtsIndexSpec {
        index_name: "bm25_doc_tokens_idx",
        table: "bm25_doc",
        field: "tokens",
    }]
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} \
             SEARCH ANALYZER {analyzer} BM25 CONCURRENTLY;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
        )
    }
}

/// Declare unique keys and plain lookup indexes. Statements use
/// `IF NOT EXISTS` and run sequentially to avoid read/write clashes.
pub async fn ensure_schema_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    for statement in SCHEMA_INDEX_STATEMENTS {
        db.client
            .query(statement)
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;
    }
    Ok(())
}

/// Build the runtime Surreal indexes (FTS + HNSW) with readiness polling.
/// Idempotent; overwrites the HNSW definitions when the dimension changed.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    ensure_runtime_indexes_inner(db, embedding_dimension)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

async fn ensure_runtime_indexes_inner(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<()> {
    create_fts_analyzer(db).await?;

    for spec in fts_index_specs() {
        if index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(db, spec.definition(), spec.index_name, spec.table).await?;
    }

    let hnsw_tasks = hnsw_index_specs().into_iter().map(|spec| async move {
        match existing_hnsw_dimension(db, &spec).await? {
            None => {
                create_index_with_polling(
                    db,
                    spec.definition_if_not_exists(embedding_dimension),
                    spec.index_name,
                    spec.table,
                )
                .await
            }
            Some(dimension) if dimension == embedding_dimension => Ok(()),
            Some(dimension) => {
                debug!(
                    index = spec.index_name,
                    table = spec.table,
                    existing_dimension = dimension,
                    target_dimension = embedding_dimension,
                    "Overwriting HNSW index to match new embedding dimension"
                );
                create_index_with_polling(
                    db,
                    spec.definition_overwrite(embedding_dimension),
                    spec.index_name,
                    spec.table,
                )
                .await
            }
        }
    });

    try_join_all(hnsw_tasks).await.map(|_| ())?;

    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS blank
            FILTERS lowercase, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );

    match db.client.query(snowball_query).await {
        Ok(res) => {
            if res.check().is_ok() {
                return Ok(());
            }
            warn!(
                "Snowball analyzer check failed; attempting lowercase-only fallback (analyzer: {})",
                FTS_ANALYZER_NAME
            );
        }
        Err(err) => {
            warn!(
                error = %err,
                "Snowball analyzer creation errored; attempting lowercase-only fallback"
            );
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS blank
            FILTERS lowercase;",
        analyzer = FTS_ANALYZER_NAME
    );

    db.client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?
        .check()
        .context("failed to create fallback FTS analyzer")?;

    Ok(())
}

async fn table_index_definitions(
    db: &SurrealDbClient,
    table: &str,
) -> Result<Option<serde_json::Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut res = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;
    let info: Option<Value> = res.take(0).context("failed to take table info result")?;

    Ok(info
        .and_then(|v| v.get("indexes").cloned())
        .and_then(|v| v.as_object().cloned()))
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    Ok(table_index_definitions(db, table)
        .await?
        .is_some_and(|indexes| indexes.contains_key(index_name)))
}

async fn existing_hnsw_dimension(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, spec.table).await? else {
        return Ok(None);
    };

    let Some(definition) = indexes.get(spec.index_name).and_then(|details| {
        details
            .as_str()
            .or_else(|| details.get("Strand").and_then(|v| v.as_str()))
    }) else {
        return Ok(None);
    };

    Ok(extract_dimension(definition).and_then(|d| usize::try_from(d).ok()))
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on table {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                warn!(
                    index = %index_name,
                    table = %table,
                    error = ?err,
                    attempt = attempts,
                    "Index definition failed"
                );
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("index definition failed for {index_name} on {table}")
                });
            }
        }
    }

    poll_index_build_status(db, index_name, table).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let started_at = std::time::Instant::now();

    loop {
        tokio::time::sleep(INDEX_POLL_INTERVAL).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db
            .client
            .query(info_query)
            .await
            .with_context(|| format!("checking index build status for {index_name} on {table}"))?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(info) = info else {
            warn!(
                index = %index_name,
                table = %table,
                "INFO FOR INDEX returned no data; assuming index definition might be missing"
            );
            break;
        };

        let status = info
            .get("building")
            .and_then(|b| b.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("ready")
            .to_string();

        if status.eq_ignore_ascii_case("ready") || status.eq_ignore_ascii_case("built") {
            debug!(
                index = %index_name,
                table = %table,
                elapsed = ?started_at.elapsed(),
                "Index is ready"
            );
            break;
        }

        if status.eq_ignore_ascii_case("error") {
            warn!(
                index = %index_name,
                table = %table,
                status = status,
                "Index build reported error status; stopping polling"
            );
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn schema_and_runtime_indexes_are_idempotent() {
        let namespace = "index_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to create in-memory surreal");

        ensure_schema_indexes(&db)
            .await
            .expect("failed to build schema indexes");
        ensure_runtime_indexes(&db, 8)
            .await
            .expect("failed to build runtime indexes");

        // Second pass must be a no-op, not an error.
        ensure_schema_indexes(&db)
            .await
            .expect("schema indexes should be idempotent");
        ensure_runtime_indexes(&db, 8)
            .await
            .expect("runtime indexes should be idempotent");
    }

    #[test]
    fn extracts_dimension_from_definition() {
        let definition =
            "DEFINE INDEX idx_embedding_code ON code_embedding FIELDS embedding HNSW DIMENSION 768 DIST EUCLIDEAN";
        assert_eq!(extract_dimension(definition), Some(768));
        assert_eq!(extract_dimension("DEFINE INDEX plain ON t FIELDS f"), None);
    }
}
