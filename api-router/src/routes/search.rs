use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use common::storage::types::snippet::SnippetSource;
use retrieval_pipeline::{SearchFilters, SearchRequest, SnippetResult};

use crate::{
    api_state::ApiState,
    error::ApiError,
    jsonapi::{Document, NewResource, Resource},
    routes::enrichments::EnrichmentAttributes,
};

const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize, Default)]
pub struct SearchAttributes {
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub filters: SearchFilterAttributes,
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchFilterAttributes {
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultAttributes {
    pub content: String,
    pub extension: String,
    pub derives_from: Vec<SnippetSource>,
    pub score: f32,
    pub bm25_score: Option<f32>,
    pub code_distance: Option<f32>,
    pub text_distance: Option<f32>,
    pub found_via: Vec<&'static str>,
    pub enrichments: Vec<EnrichmentAttributes>,
}

fn result_resource(result: &SnippetResult) -> Resource<SearchResultAttributes> {
    Resource::new(
        "search_result",
        &result.snippet.id,
        SearchResultAttributes {
            content: result.snippet.content.clone(),
            extension: result.snippet.extension.clone(),
            derives_from: result.snippet.derives_from.clone(),
            score: result.score,
            bm25_score: result.scores.bm25,
            code_distance: result.scores.code_distance,
            text_distance: result.scores.text_distance,
            found_via: result.found_via.clone(),
            enrichments: result
                .enrichments
                .iter()
                .map(|enrichment| EnrichmentAttributes {
                    enrichment_type: enrichment.enrichment_type,
                    subtype: enrichment.subtype,
                    content: enrichment.content.clone(),
                    created_at: enrichment.created_at,
                    updated_at: enrichment.updated_at,
                })
                .collect(),
        },
    )
}

/// `POST /api/v1/search`: hybrid search over the indexed corpus.
pub async fn search(
    State(state): State<ApiState>,
    Json(body): Json<Document<NewResource<SearchAttributes>>>,
) -> Result<impl IntoResponse, ApiError> {
    let attributes = body.data.attributes;

    let limit = attributes.limit.unwrap_or(DEFAULT_LIMIT);
    if limit <= 0 {
        return Err(ApiError::ValidationError("limit must be positive".into()));
    }

    let request = SearchRequest {
        keywords: attributes.keywords,
        code: attributes.code,
        text: attributes.text,
        limit: limit as usize,
        filters: SearchFilters {
            sources: attributes.filters.sources,
            languages: attributes.filters.languages,
        },
    };

    let results = state.search.find(request).await?;
    let resources: Vec<Resource<SearchResultAttributes>> =
        results.iter().map(result_resource).collect();

    Ok(Json(Document::new(resources)))
}
