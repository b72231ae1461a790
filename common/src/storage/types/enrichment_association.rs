use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// The entities an enrichment may attach to. The serialized tags are part of
/// the persisted contract and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntityKind {
    #[serde(rename = "snippet")]
    Snippet,
    #[serde(rename = "git_commits")]
    GitCommits,
    #[serde(rename = "git_repos")]
    GitRepos,
    #[serde(rename = "enrichments_v2")]
    EnrichmentsV2,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snippet => "snippet",
            Self::GitCommits => "git_commits",
            Self::GitRepos => "git_repos",
            Self::EnrichmentsV2 => "enrichments_v2",
        }
    }
}

stored_object!(EnrichmentAssociation, "enrichment_association", {
    enrichment_id: String,
    entity_type: EntityKind,
    entity_id: String
});

impl EnrichmentAssociation {
    pub fn new(enrichment_id: &str, entity_type: EntityKind, entity_id: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            enrichment_id: enrichment_id.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
        }
    }

    /// Attachment is idempotent on (enrichment_id, entity_type, entity_id)
    /// through the unique index.
    pub async fn attach(db: &SurrealDbClient, associations: Vec<Self>) -> Result<(), AppError> {
        if associations.is_empty() {
            return Ok(());
        }

        db.query("INSERT IGNORE INTO enrichment_association $associations")
            .bind(("associations", associations))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn enrichment_ids_for_entity(
        db: &SurrealDbClient,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE enrichment_id FROM type::table($table) \
                 WHERE entity_type = $entity_type AND entity_id = $entity_id \
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("entity_type", entity_type))
            .bind(("entity_id", entity_id.to_string()))
            .await?;
        let ids: Vec<String> = response.take(0)?;

        Ok(ids)
    }

    pub async fn delete_for_entities(
        db: &SurrealDbClient,
        entity_type: EntityKind,
        entity_ids: Vec<String>,
    ) -> Result<Vec<String>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT VALUE enrichment_id FROM type::table($table) \
                 WHERE entity_type = $entity_type AND entity_id INSIDE $entity_ids",
            )
            .bind(("table", Self::table_name()))
            .bind(("entity_type", entity_type))
            .bind(("entity_ids", entity_ids.clone()))
            .await?;
        let enrichment_ids: Vec<String> = response.take(0)?;

        db.query(
            "DELETE type::table($table) \
             WHERE entity_type = $entity_type AND entity_id INSIDE $entity_ids",
        )
        .bind(("table", Self::table_name()))
        .bind(("entity_type", entity_type))
        .bind(("entity_ids", entity_ids))
        .await?
        .check()?;

        Ok(enrichment_ids)
    }

    pub async fn count_for_enrichment(
        db: &SurrealDbClient,
        enrichment_id: &str,
    ) -> Result<u64, AppError> {
        let mut response = db
            .query(
                "SELECT count() AS total FROM type::table($table) \
                 WHERE enrichment_id = $enrichment_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("enrichment_id", enrichment_id.to_string()))
            .await?;
        let counts: Vec<serde_json::Value> = response.take(0)?;

        Ok(counts
            .first()
            .and_then(|row| row.get("total"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::indexes::ensure_schema_indexes;

    #[tokio::test]
    async fn attach_is_idempotent_on_the_triple() {
        let namespace = "assoc_test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        ensure_schema_indexes(&db)
            .await
            .expect("indexes should build");

        let first = EnrichmentAssociation::new("e-1", EntityKind::Snippet, "snippet-1");
        let replay = EnrichmentAssociation::new("e-1", EntityKind::Snippet, "snippet-1");
        // Same enrichment attached to a second entity is a new association.
        let commit_link = EnrichmentAssociation::new("e-1", EntityKind::GitCommits, "sha-1");

        EnrichmentAssociation::attach(&db, vec![first, replay, commit_link])
            .await
            .expect("attach should succeed");

        let ids =
            EnrichmentAssociation::enrichment_ids_for_entity(&db, EntityKind::Snippet, "snippet-1")
                .await
                .expect("listing should succeed");
        assert_eq!(ids, vec!["e-1".to_string()]);

        assert_eq!(
            EnrichmentAssociation::count_for_enrichment(&db, "e-1")
                .await
                .expect("count should succeed"),
            2
        );
    }

    #[test]
    fn entity_tags_are_stable() {
        assert_eq!(EntityKind::Snippet.as_str(), "snippet");
        assert_eq!(EntityKind::GitCommits.as_str(), "git_commits");
        assert_eq!(EntityKind::GitRepos.as_str(), "git_repos");
        assert_eq!(EntityKind::EnrichmentsV2.as_str(), "enrichments_v2");
    }
}
