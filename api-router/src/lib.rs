use api_state::ApiState;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{
    commits::{
        get_commit, get_commit_enrichment, get_commit_file, list_commit_enrichments,
        list_commit_files, list_commit_snippets, list_commits, rescan_commit,
    },
    enrichments::{
        deprecated_embeddings, get_enrichment, list_enrichments, list_repository_enrichments,
    },
    health::healthz,
    mcp::mcp_endpoint,
    queue::{get_queue_task, list_queue},
    repositories::{
        create_repository, delete_repository, get_repository, list_repositories,
        repository_status, repository_status_summary,
    },
    search::search,
};

pub mod api_state;
pub mod error;
pub mod jsonapi;
mod routes;

/// The JSON:API surface plus the MCP endpoint.
pub fn api_routes(state: ApiState) -> Router {
    let v1 = Router::new()
        .route("/repositories", post(create_repository).get(list_repositories))
        .route(
            "/repositories/{id}",
            get(get_repository).delete(delete_repository),
        )
        .route("/repositories/{id}/status", get(repository_status))
        .route(
            "/repositories/{id}/status/summary",
            get(repository_status_summary),
        )
        .route("/repositories/{id}/commits", get(list_commits))
        .route("/repositories/{id}/commits/{sha}", get(get_commit))
        .route("/repositories/{id}/commits/{sha}/files", get(list_commit_files))
        .route(
            "/repositories/{id}/commits/{sha}/files/{blob}",
            get(get_commit_file),
        )
        .route(
            "/repositories/{id}/commits/{sha}/snippets",
            get(list_commit_snippets),
        )
        .route(
            "/repositories/{id}/commits/{sha}/enrichments",
            get(list_commit_enrichments),
        )
        .route(
            "/repositories/{id}/commits/{sha}/enrichments/{enrichment_id}",
            get(get_commit_enrichment),
        )
        .route(
            "/repositories/{id}/commits/{sha}/rescan",
            post(rescan_commit),
        )
        .route(
            "/repositories/{id}/enrichments",
            get(list_repository_enrichments),
        )
        .route("/enrichments", get(list_enrichments))
        .route("/enrichments/{id}", get(get_enrichment))
        .route("/search", post(search))
        .route("/queue", get(list_queue))
        .route("/queue/{id}", get(get_queue_task))
        .route("/embeddings", get(deprecated_embeddings));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/mcp", post(mcp_endpoint))
        .nest("/api/v1", v1)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::storage::db::SurrealDbClient;
    use common::storage::indexes::{ensure_runtime_indexes, ensure_schema_indexes};
    use common::utils::embedding::EmbeddingProvider;
    use ingestion_pipeline::scanner::GitScanner;
    use ingestion_pipeline::{IngestionConfig, IngestionPipeline, PipelineServices};
    use retrieval_pipeline::SearchEngine;
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    struct NoopGenerator;

    #[async_trait::async_trait]
    impl ingestion_pipeline::enricher::TextGenerator for NoopGenerator {
        async fn generate(
            &self,
            _system_prompt: &str,
            text: &str,
        ) -> Result<String, common::error::AppError> {
            Ok(format!("notes: {text}"))
        }
    }

    async fn test_router() -> Router {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("api_test_ns", &database)
                .await
                .expect("failed to create in-memory surreal"),
        );
        ensure_schema_indexes(&db).await.expect("schema indexes");
        ensure_runtime_indexes(&db, 8).await.expect("runtime indexes");

        let embedder = Arc::new(EmbeddingProvider::hashed(8));
        let search = Arc::new(SearchEngine::new(
            Arc::clone(&db),
            Arc::clone(&embedder),
            Arc::clone(&embedder),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&db),
            PipelineServices {
                scanner: Arc::new(GitScanner::new()),
                generator: Arc::new(NoopGenerator),
                code_embedder: Arc::clone(&embedder),
                text_embedder: embedder,
            },
            IngestionConfig::default(),
        ));

        api_routes(ApiState {
            db,
            search,
            pipeline,
        })
    }

    #[tokio::test]
    async fn healthz_reports_healthy() {
        let router = test_router().await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should run");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["status"], "healthy");
    }

    #[tokio::test]
    async fn repository_create_is_201_then_200() {
        let router = test_router().await;
        let payload = serde_json::json!({
            "data": {
                "type": "repository",
                "attributes": { "remote_uri": "https://github.com/helix/kodit.git" }
            }
        });

        let request = |body: serde_json::Value| {
            Request::builder()
                .method("POST")
                .uri("/api/v1/repositories")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request should build")
        };

        let created = router
            .clone()
            .oneshot(request(payload.clone()))
            .await
            .expect("request should run");
        assert_eq!(created.status(), StatusCode::CREATED);

        let existing = router
            .oneshot(request(payload))
            .await
            .expect("request should run");
        assert_eq!(existing.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_search_is_a_validation_error() {
        let router = test_router().await;
        let payload = serde_json::json!({
            "data": { "type": "search", "attributes": {} }
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/search")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should run");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn embeddings_listing_is_gone() {
        let router = test_router().await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/embeddings")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should run");

        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn mcp_initialize_returns_a_session_id() {
        let router = test_router().await;
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {}
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should run");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("Mcp-Session-Id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["result"]["serverInfo"]["name"], "kodit");
    }

    #[tokio::test]
    async fn mcp_rejects_unknown_methods() {
        let router = test_router().await;
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "resources/list",
            "params": {}
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should run");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["error"]["code"], -32601);
    }
}
