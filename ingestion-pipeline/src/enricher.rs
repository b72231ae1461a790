use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use common::{
    error::AppError,
    utils::llm::{system_message, user_message, LlmClient},
};

/// One text to enrich, with the system prompt that shapes the output.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub id: String,
    pub text: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResponse {
    pub id: String,
    pub text: String,
}

pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EnrichOptions {
    /// Tolerated ratio of failed requests; 0 means any failure fails the call.
    pub max_failure_rate: f32,
    /// Concurrent in-flight generations; values below 1 behave as 1.
    pub parallelism: usize,
    pub on_progress: Option<ProgressCallback>,
}

/// The chat capability the enricher drives; a seam so tests can substitute a
/// scripted generator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, text: &str) -> Result<String, AppError>;
}

/// Production generator over the provider layer.
pub struct LlmTextGenerator {
    client: Arc<LlmClient>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl LlmTextGenerator {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self {
            client,
            max_tokens: Some(1024),
            temperature: Some(0.2),
        }
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(&self, system_prompt: &str, text: &str) -> Result<String, AppError> {
        let output = self
            .client
            .chat_completion(
                vec![system_message(system_prompt), user_message(text)],
                self.max_tokens,
                self.temperature,
            )
            .await?;
        Ok(output.content)
    }
}

/// Parallel LLM enrichment with a failure budget.
///
/// Empty-text requests are filtered out before dispatch. The remaining
/// requests run under a semaphore sized by `parallelism`; responses preserve
/// the filtered input order. When more than `max_failure_rate` of the
/// requests fail, the whole call fails with every per-request cause joined
/// into one error; below the budget, failed slots are simply omitted.
pub struct Enricher {
    generator: Arc<dyn TextGenerator>,
}

impl Enricher {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn enrich(
        &self,
        requests: Vec<EnrichmentRequest>,
        options: &EnrichOptions,
    ) -> Result<Vec<EnrichmentResponse>, AppError> {
        let requests: Vec<EnrichmentRequest> = requests
            .into_iter()
            .filter(|request| !request.text.trim().is_empty())
            .collect();
        let total = requests.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks = requests.into_iter().map(|request| {
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let on_progress = options.on_progress.clone();
            let generator = Arc::clone(&self.generator);
            async move {
                let EnrichmentRequest {
                    id,
                    text,
                    system_prompt,
                } = request;
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| (id.clone(), AppError::Cancelled))?;
                let result = generator.generate(&system_prompt, &text).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = &on_progress {
                    callback(done, total);
                }

                match result {
                    Ok(text) => Ok(EnrichmentResponse { id, text }),
                    Err(err) => Err((id, err)),
                }
            }
        });

        let outcomes = futures::future::join_all(tasks).await;

        let mut responses = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(response) => responses.push(response),
                Err((id, err)) => failures.push(format!("{id}: {err}")),
            }
        }

        if !failures.is_empty() {
            let failure_rate = failures.len() as f32 / total as f32;
            debug!(
                failed = failures.len(),
                total, failure_rate, "enrichment finished with failures"
            );
            if failure_rate > options.max_failure_rate {
                return Err(AppError::PartialFailure(format!(
                    "{} of {} enrichment requests failed: {}",
                    failures.len(),
                    total,
                    failures.join("; ")
                )));
            }
        }

        Ok(responses)
    }
}
