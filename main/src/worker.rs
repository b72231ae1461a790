use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

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
    enricher::LlmTextGenerator, run_worker_loop, scanner::GitScanner, IngestionConfig,
    IngestionPipeline, PipelineServices,
};
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

    let worker_count = config.worker_count.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(2)
    });
    let poll_interval = Duration::from_millis(config.queue_poll_interval_ms);
    info!(worker_count, "starting queue workers");

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        handles.push(tokio::spawn(run_worker_loop(
            Arc::clone(&db),
            Arc::clone(&pipeline),
            poll_interval,
        )));
    }
    for handle in handles {
        handle.await?.map_err(|e| e as Box<dyn std::error::Error>)?;
    }

    Ok(())
}
