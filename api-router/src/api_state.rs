use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::SearchEngine;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub search: Arc<SearchEngine>,
    pub pipeline: Arc<IngestionPipeline>,
}
