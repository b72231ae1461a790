use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default)]
    pub db_username: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    #[serde(default = "default_db_database")]
    pub db_database: String,

    pub enrichment_endpoint_api_key: Option<String>,
    #[serde(default = "default_endpoint_base_url")]
    pub enrichment_endpoint_base_url: String,
    #[serde(default = "default_chat_model")]
    pub enrichment_endpoint_model: String,

    pub embedding_endpoint_api_key: Option<String>,
    #[serde(default = "default_endpoint_base_url")]
    pub embedding_endpoint_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_endpoint_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Use the in-process fastembed model instead of the embedding endpoint.
    #[serde(default)]
    pub use_local_embedder: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub disable_telemetry: bool,
}

fn default_db_url() -> String {
    "mem://".to_string()
}

fn default_db_namespace() -> String {
    "kodit".to_string()
}

fn default_db_database() -> String {
    "kodit".to_string()
}

fn default_endpoint_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_queue_poll_interval_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything_but_api_keys() {
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({})).expect("defaults should deserialize");

        assert_eq!(config.db_url, "mem://");
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.queue_poll_interval_ms, 500);
        assert_eq!(config.max_retries, 5);
        assert!(config.enrichment_endpoint_api_key.is_none());
        assert!(!config.use_local_embedder);
    }
}
