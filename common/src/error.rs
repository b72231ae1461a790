use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transient upstream error: {0}")]
    UpstreamTransient(String),
    #[error("Upstream provider error: {0}")]
    UpstreamPermanent(String),
    #[error("Partial failure: {0}")]
    PartialFailure(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Git error: {0}")]
    Git(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Attach the failing operation to the message while keeping the kind.
    pub fn with_operation(self, operation: &str) -> Self {
        match self {
            Self::NotFound(msg) => Self::NotFound(format!("{operation}: {msg}")),
            Self::Validation(msg) => Self::Validation(format!("{operation}: {msg}")),
            Self::UpstreamTransient(msg) => Self::UpstreamTransient(format!("{operation}: {msg}")),
            Self::UpstreamPermanent(msg) => Self::UpstreamPermanent(format!("{operation}: {msg}")),
            Self::PartialFailure(msg) => Self::PartialFailure(format!("{operation}: {msg}")),
            Self::Git(msg) => Self::Git(format!("{operation}: {msg}")),
            Self::LLMParsing(msg) => Self::LLMParsing(format!("{operation}: {msg}")),
            Self::InternalError(msg) => Self::InternalError(format!("{operation}: {msg}")),
            other => other,
        }
    }
}
