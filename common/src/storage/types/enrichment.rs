use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::enrichment_association::{EnrichmentAssociation, EntityKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentType {
    Architecture,
    Development,
    Usage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSubtype {
    Snippet,
    SnippetSummary,
    Example,
    ExampleSummary,
    ApiDocs,
    Physical,
    Cookbook,
    CommitDescription,
    DatabaseSchema,
}

stored_object!(Enrichment, "enrichments_v2", {
    #[serde(rename = "type")]
    enrichment_type: EnrichmentType,
    subtype: EnrichmentSubtype,
    content: String
});

impl Enrichment {
    pub fn new(enrichment_type: EnrichmentType, subtype: EnrichmentSubtype, content: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            enrichment_type,
            subtype,
            content,
        }
    }

    /// Persist the enrichment and attach it to each target entity. Enrichment
    /// content is not content-addressed; callers check `list_for_entity` with
    /// the (type, subtype) pair before generating a replacement.
    pub async fn create_with_associations(
        db: &SurrealDbClient,
        enrichment: Self,
        targets: Vec<(EntityKind, String)>,
    ) -> Result<Self, AppError> {
        db.store_item(enrichment.clone()).await?;

        let associations = targets
            .into_iter()
            .map(|(entity_type, entity_id)| {
                EnrichmentAssociation::new(&enrichment.id, entity_type, &entity_id)
            })
            .collect();
        EnrichmentAssociation::attach(db, associations).await?;

        Ok(enrichment)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(id).await?)
    }

    pub async fn require(db: &SurrealDbClient, id: &str) -> Result<Self, AppError> {
        Self::get(db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("enrichment {id}")))
    }

    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM type::table($table) ORDER BY created_at ASC")
            .bind(("table", Self::table_name()))
            .await?;
        let enrichments: Vec<Self> = response.take(0)?;

        Ok(enrichments)
    }

    /// Enrichments attached to one entity, optionally narrowed by type and
    /// subtype, in attachment order.
    pub async fn list_for_entity(
        db: &SurrealDbClient,
        entity_type: EntityKind,
        entity_id: &str,
        type_filter: Option<EnrichmentType>,
        subtype_filter: Option<EnrichmentSubtype>,
    ) -> Result<Vec<Self>, AppError> {
        let ids =
            EnrichmentAssociation::enrichment_ids_for_entity(db, entity_type, entity_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .query(
                "SELECT * FROM type::table($table) WHERE id IN $things \
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .await?;
        let mut enrichments: Vec<Self> = response.take(0)?;

        if let Some(wanted) = type_filter {
            enrichments.retain(|e| e.enrichment_type == wanted);
        }
        if let Some(wanted) = subtype_filter {
            enrichments.retain(|e| e.subtype == wanted);
        }

        Ok(enrichments)
    }

    /// Drop the associations of the given entities, then any enrichment left
    /// with no association at all.
    pub async fn delete_for_entities(
        db: &SurrealDbClient,
        entity_type: EntityKind,
        entity_ids: Vec<String>,
    ) -> Result<(), AppError> {
        let enrichment_ids =
            EnrichmentAssociation::delete_for_entities(db, entity_type, entity_ids).await?;

        for enrichment_id in enrichment_ids {
            if EnrichmentAssociation::count_for_enrichment(db, &enrichment_id).await? == 0 {
                db.delete_item::<Self>(&enrichment_id).await?;
            }
        }

        Ok(())
    }
}
