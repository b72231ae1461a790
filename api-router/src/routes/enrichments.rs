use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use common::storage::types::{
    enrichment::{Enrichment, EnrichmentSubtype, EnrichmentType},
    enrichment_association::EntityKind,
    repository::Repository,
};

use crate::{
    api_state::ApiState,
    error::ApiError,
    jsonapi::{Document, Resource},
};

#[derive(Debug, Serialize)]
pub struct EnrichmentAttributes {
    #[serde(rename = "type")]
    pub enrichment_type: EnrichmentType,
    pub subtype: EnrichmentSubtype,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn enrichment_resource(enrichment: &Enrichment) -> Resource<EnrichmentAttributes> {
    Resource::new(
        "enrichment",
        &enrichment.id,
        EnrichmentAttributes {
            enrichment_type: enrichment.enrichment_type,
            subtype: enrichment.subtype,
            content: enrichment.content.clone(),
            created_at: enrichment.created_at,
            updated_at: enrichment.updated_at,
        },
    )
}

pub async fn list_repository_enrichments(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Repository::require(&state.db, &id).await?;
    let enrichments =
        Enrichment::list_for_entity(&state.db, EntityKind::GitRepos, &id, None, None).await?;
    let resources: Vec<Resource<EnrichmentAttributes>> =
        enrichments.iter().map(enrichment_resource).collect();

    Ok(Json(Document::new(resources)))
}

pub async fn list_enrichments(
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let enrichments = Enrichment::list_all(&state.db).await?;
    let resources: Vec<Resource<EnrichmentAttributes>> =
        enrichments.iter().map(enrichment_resource).collect();

    Ok(Json(Document::new(resources)))
}

pub async fn get_enrichment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let enrichment = Enrichment::require(&state.db, &id).await?;

    Ok(Json(Document::new(enrichment_resource(&enrichment))))
}

/// The embeddings listing predates the split vector tables and is preserved
/// as a tombstone.
pub async fn deprecated_embeddings() -> Result<(), ApiError> {
    Err(ApiError::Gone(
        "the embeddings listing has been removed; query /api/v1/search instead".into(),
    ))
}
