use serde::Deserialize;
use surrealdb::sql::Thing;
use tracing::debug;

use common::{error::AppError, storage::db::SurrealDbClient, stored_object};

use crate::tokenize::normalized_passage;

stored_object!(Bm25Doc, "bm25_doc", {
    tokens: String
});

pub const DEFAULT_TOP_K: usize = 10;

/// One lexical hit: snippet id plus its BM25 relevance (non-negative).
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub snippet_id: String,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    #[serde(deserialize_with = "deserialize_record_id")]
    id: String,
    score: Option<f32>,
}

/// Upsert (snippet_id, passage) documents into the keyword index.
///
/// Documents with a blank id or a passage that normalizes to nothing are
/// dropped; re-indexing a known id replaces its token stream.
pub async fn index_documents(
    db: &SurrealDbClient,
    documents: Vec<(String, String)>,
) -> Result<usize, AppError> {
    let mut indexed = 0;
    for (snippet_id, passage) in documents {
        if snippet_id.is_empty() {
            continue;
        }
        let tokens = normalized_passage(&passage);
        if tokens.is_empty() {
            continue;
        }

        let now = chrono::Utc::now();
        db.upsert_item(Bm25Doc {
            id: snippet_id,
            created_at: now,
            updated_at: now,
            tokens,
        })
        .await?;
        indexed += 1;
    }

    Ok(indexed)
}

/// Top-k keyword search, optionally restricted to a snippet id set. Results
/// come back in descending BM25 relevance.
pub async fn search(
    db: &SurrealDbClient,
    query: &str,
    top_k: usize,
    snippet_id_filter: Option<&[String]>,
) -> Result<Vec<KeywordHit>, AppError> {
    let terms = normalized_passage(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    debug!(top_k, filtered = snippet_id_filter.is_some(), "keyword search");

    let rows: Vec<ScoreRow> = match snippet_id_filter {
        Some(filter) => {
            if filter.is_empty() {
                return Ok(Vec::new());
            }
            let things: Vec<Thing> = filter
                .iter()
                .map(|id| Thing::from((Bm25Doc::table_name(), id.as_str())))
                .collect();
            db.query(
                "SELECT id, search::score(0) AS score FROM bm25_doc \
                 WHERE tokens @0@ $terms AND id IN $things \
                 ORDER BY score DESC LIMIT $limit",
            )
            .bind(("terms", terms))
            .bind(("things", things))
            .bind(("limit", top_k as i64))
            .await?
            .take(0)?
        }
        None => db
            .query(
                "SELECT id, search::score(0) AS score FROM bm25_doc \
                 WHERE tokens @0@ $terms \
                 ORDER BY score DESC LIMIT $limit",
            )
            .bind(("terms", terms))
            .bind(("limit", top_k as i64))
            .await?
            .take(0)?,
    };

    Ok(rows
        .into_iter()
        .map(|row| KeywordHit {
            snippet_id: row.id,
            // Relevance never goes negative on the way out.
            score: row.score.unwrap_or_default().max(0.0),
        })
        .collect())
}

/// Remove documents from the keyword index.
pub async fn delete(db: &SurrealDbClient, snippet_ids: Vec<String>) -> Result<(), AppError> {
    // Ids that are empty, "0", or dash-prefixed never name a real document;
    // they are dropped rather than handed to the index.
    let things: Vec<Thing> = snippet_ids
        .iter()
        .filter(|id| !id.is_empty() && id.as_str() != "0" && !id.starts_with('-'))
        .map(|id| Thing::from((Bm25Doc::table_name(), id.as_str())))
        .collect();
    if things.is_empty() {
        return Ok(());
    }

    db.query("DELETE bm25_doc WHERE id IN $things")
        .bind(("things", things))
        .await?
        .check()?;

    Ok(())
}
