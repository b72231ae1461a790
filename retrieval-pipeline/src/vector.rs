use serde::Deserialize;
use surrealdb::sql::Thing;
use tracing::debug;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::record::deserialize_record_id},
};

/// The two vector tables share one contract: `Code` holds snippet content
/// embeddings, `Text` holds embeddings of summary enrichments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTable {
    Code,
    Text,
}

impl EmbeddingTable {
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Code => "code_embedding",
            Self::Text => "text_embedding",
        }
    }
}

/// One vector hit: snippet id plus its L2 distance to the query (ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub snippet_id: String,
    pub distance: f32,
}

#[derive(Debug, Deserialize)]
struct DistanceRow {
    #[serde(deserialize_with = "deserialize_record_id")]
    id: String,
    distance: Option<f32>,
}

/// KNN candidate pool width.
const KNN_EF: usize = 40;

/// Upsert embeddings keyed by snippet id. The row id stays stable across
/// re-embeds while `updated_at` advances; a vector of the wrong dimension is
/// rejected before anything is written.
pub async fn save_all(
    db: &SurrealDbClient,
    table: EmbeddingTable,
    rows: Vec<(String, Vec<f32>)>,
    dimension: usize,
) -> Result<(), AppError> {
    for (snippet_id, embedding) in &rows {
        if embedding.len() != dimension {
            return Err(AppError::Validation(format!(
                "embedding for {snippet_id} has dimension {}, expected {dimension}",
                embedding.len()
            )));
        }
    }

    for (snippet_id, embedding) in rows {
        db.query(
            "UPSERT type::thing($table, $id) SET embedding = $embedding, \
             created_at = created_at ?? time::now(), updated_at = time::now()",
        )
        .bind(("table", table.table_name()))
        .bind(("id", snippet_id))
        .bind(("embedding", embedding))
        .await?
        .check()?;
    }

    Ok(())
}

/// Top-k nearest neighbours by L2 distance, ascending, optionally restricted
/// to a snippet id set.
pub async fn search(
    db: &SurrealDbClient,
    table: EmbeddingTable,
    query_vector: Vec<f32>,
    top_k: usize,
    snippet_id_filter: Option<&[String]>,
) -> Result<Vec<VectorHit>, AppError> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    debug!(
        table = table.table_name(),
        top_k,
        filtered = snippet_id_filter.is_some(),
        "vector search"
    );

    let rows: Vec<DistanceRow> = match snippet_id_filter {
        Some(filter) => {
            if filter.is_empty() {
                return Ok(Vec::new());
            }
            let things: Vec<Thing> = filter
                .iter()
                .map(|id| Thing::from((table.table_name(), id.as_str())))
                .collect();
            // Over-fetch before filtering so the knn pool is not starved by
            // excluded neighbours.
            let pool = top_k.saturating_mul(4);
            let sql = format!(
                "SELECT id, vector::distance::knn() AS distance FROM {table} \
                 WHERE embedding <|{pool},{KNN_EF}|> $vector AND id IN $things \
                 ORDER BY distance ASC LIMIT $limit",
                table = table.table_name(),
            );
            db.query(sql)
                .bind(("vector", query_vector))
                .bind(("things", things))
                .bind(("limit", top_k as i64))
                .await?
                .take(0)?
        }
        None => {
            let sql = format!(
                "SELECT id, vector::distance::knn() AS distance FROM {table} \
                 WHERE embedding <|{top_k},{KNN_EF}|> $vector \
                 ORDER BY distance ASC LIMIT $limit",
                table = table.table_name(),
            );
            db.query(sql)
                .bind(("vector", query_vector))
                .bind(("limit", top_k as i64))
                .await?
                .take(0)?
        }
    };

    Ok(rows
        .into_iter()
        .map(|row| VectorHit {
            snippet_id: row.id,
            distance: row.distance.unwrap_or(f32::MAX),
        })
        .collect())
}

pub async fn delete(
    db: &SurrealDbClient,
    table: EmbeddingTable,
    snippet_ids: Vec<String>,
) -> Result<(), AppError> {
    if snippet_ids.is_empty() {
        return Ok(());
    }

    let things: Vec<Thing> = snippet_ids
        .iter()
        .map(|id| Thing::from((table.table_name(), id.as_str())))
        .collect();

    db.query("DELETE type::table($table) WHERE id IN $things")
        .bind(("table", table.table_name()))
        .bind(("things", things))
        .await?
        .check()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use uuid::Uuid;

    const DIM: usize = 4;

    async fn test_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("vector_test_ns", &database)
            .await
            .expect("failed to create in-memory surreal");
        ensure_runtime_indexes(&db, DIM)
            .await
            .expect("failed to build runtime indexes");
        db
    }

    #[tokio::test]
    async fn returns_neighbours_in_ascending_distance() {
        let db = test_db().await;

        save_all(
            &db,
            EmbeddingTable::Code,
            vec![
                ("near".to_string(), vec![1.0, 0.0, 0.0, 0.0]),
                ("far".to_string(), vec![0.0, 1.0, 0.0, 0.0]),
                ("farther".to_string(), vec![0.0, 0.0, 1.0, 1.0]),
            ],
            DIM,
        )
        .await
        .expect("save should succeed");

        let hits = search(
            &db,
            EmbeddingTable::Code,
            vec![0.9, 0.1, 0.0, 0.0],
            2,
            None,
        )
        .await
        .expect("search should succeed");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet_id, "near");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn rejects_wrong_dimension_before_writing() {
        let db = test_db().await;

        let err = save_all(
            &db,
            EmbeddingTable::Text,
            vec![("bad".to_string(), vec![1.0, 2.0])],
            DIM,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let hits = search(&db, EmbeddingTable::Text, vec![1.0, 2.0, 0.0, 0.0], 5, None)
            .await
            .expect("search should succeed");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_id_stable_and_advances_updated_at() {
        let db = test_db().await;

        save_all(
            &db,
            EmbeddingTable::Code,
            vec![("stable".to_string(), vec![1.0, 0.0, 0.0, 0.0])],
            DIM,
        )
        .await
        .expect("first save should succeed");

        #[derive(serde::Deserialize)]
        struct Timestamps {
            created_at: surrealdb::sql::Datetime,
            updated_at: surrealdb::sql::Datetime,
        }
        let first: Vec<Timestamps> = db
            .query("SELECT created_at, updated_at FROM code_embedding")
            .await
            .expect("query should succeed")
            .take(0)
            .expect("rows should deserialize");
        assert_eq!(first.len(), 1);

        save_all(
            &db,
            EmbeddingTable::Code,
            vec![("stable".to_string(), vec![0.0, 1.0, 0.0, 0.0])],
            DIM,
        )
        .await
        .expect("re-embed should succeed");

        let second: Vec<Timestamps> = db
            .query("SELECT created_at, updated_at FROM code_embedding")
            .await
            .expect("query should succeed")
            .take(0)
            .expect("rows should deserialize");
        assert_eq!(second.len(), 1, "upsert must not create a second row");
        assert_eq!(first[0].created_at, second[0].created_at);
        assert!(second[0].updated_at >= first[0].updated_at);
    }

    #[tokio::test]
    async fn filter_and_delete_narrow_the_table() {
        let db = test_db().await;

        save_all(
            &db,
            EmbeddingTable::Code,
            vec![
                ("keep".to_string(), vec![1.0, 0.0, 0.0, 0.0]),
                ("drop".to_string(), vec![0.9, 0.1, 0.0, 0.0]),
            ],
            DIM,
        )
        .await
        .expect("save should succeed");

        let filter = vec!["keep".to_string()];
        let hits = search(
            &db,
            EmbeddingTable::Code,
            vec![1.0, 0.0, 0.0, 0.0],
            5,
            Some(&filter),
        )
        .await
        .expect("search should succeed");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet_id, "keep");

        delete(&db, EmbeddingTable::Code, vec!["keep".to_string()])
            .await
            .expect("delete should succeed");
        let hits = search(&db, EmbeddingTable::Code, vec![1.0, 0.0, 0.0, 0.0], 5, None)
            .await
            .expect("search should succeed");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet_id, "drop");
    }
}
