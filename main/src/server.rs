use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
        http_cache::{CachingTransport, HttpTransport, ReqwestTransport},
        llm::{LlmClient, ProviderOptions},
        local_embedder::LocalEmbedder,
    },
};
use ingestion_pipeline::{
    enricher::LlmTextGenerator, scanner::GitScanner, IngestionConfig, IngestionPipeline,
    PipelineServices,
};
use retrieval_pipeline::SearchEngine;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn provider_options(
    config: &AppConfig,
    api_key: Option<String>,
    base_url: &str,
) -> ProviderOptions {
    ProviderOptions {
        api_key,
        base_url: base_url.to_string(),
        chat_model: config.enrichment_endpoint_model.clone(),
        embedding_model: config.embedding_endpoint_model.clone(),
        timeout: Duration::from_secs(config.request_timeout_secs),
        max_retries: config.max_retries,
        ..ProviderOptions::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.db_url,
            &config.db_username,
            &config.db_password,
            &config.db_namespace,
            &config.db_database,
        )
        .await?,
    );

    // Every provider call goes through the on-disk response cache.
    let cache_store = StorageManager::local(Path::new(&config.data_dir))?;
    let transport: Arc<dyn HttpTransport> = Arc::new(CachingTransport::new(
        ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))?,
        cache_store,
    ));

    let chat_client = Arc::new(LlmClient::new(
        provider_options(
            &config,
            config.enrichment_endpoint_api_key.clone(),
            &config.enrichment_endpoint_base_url,
        ),
        Arc::clone(&transport),
    ));
    let embedding_client = Arc::new(LlmClient::new(
        provider_options(
            &config,
            config.embedding_endpoint_api_key.clone(),
            &config.embedding_endpoint_base_url,
        ),
        Arc::clone(&transport),
    ));

    let embedder = if config.use_local_embedder {
        Arc::new(EmbeddingProvider::local(Arc::new(LocalEmbedder::new(
            PathBuf::from(&config.data_dir).join("fastembed"),
        ))))
    } else {
        Arc::new(EmbeddingProvider::remote(
            embedding_client,
            config.embedding_dimension,
        ))
    };

    db.ensure_initialized(embedder.dimension()).await?;

    let search = Arc::new(SearchEngine::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        Arc::clone(&embedder),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        PipelineServices {
            scanner: Arc::new(GitScanner::new()),
            generator: Arc::new(LlmTextGenerator::new(chat_client)),
            code_embedder: Arc::clone(&embedder),
            text_embedder: Arc::clone(&embedder),
        },
        IngestionConfig {
            clone_root: PathBuf::from(&config.data_dir).join("clones"),
            ..IngestionConfig::default()
        },
    ));

    let app = api_routes(ApiState {
        db,
        search,
        pipeline,
    });

    let address = format!("0.0.0.0:{}", config.http_port);
    info!("Listening on {address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
