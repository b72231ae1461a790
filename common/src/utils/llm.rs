use std::sync::Arc;
use std::time::Duration;

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, CreateEmbeddingRequestArgs, CreateEmbeddingResponse,
};
use bytes::Bytes;
use futures::future::try_join_all;
use tracing::warn;

use crate::error::AppError;
use crate::utils::http_cache::{HttpRequest, HttpTransport};

/// Upstream statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Embedding inputs are sent in batches of at most this many texts; batches
/// are dispatched concurrently and usage is summed across them.
pub const EMBEDDING_BATCH_SIZE: usize = 10;

#[derive(Clone, Debug)]
pub struct ProviderOptions {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct ChatOutput {
    pub content: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

/// Chat-completion and embedding client over an OpenAI-compatible endpoint.
///
/// All calls go through the injected [`HttpTransport`], so the response cache
/// and test fakes interpose below the retry loop: a cache hit short-circuits
/// before any backoff, a fake observes exactly the requests the retry policy
/// emits.
pub struct LlmClient {
    options: ProviderOptions,
    transport: Arc<dyn HttpTransport>,
}

enum AttemptError {
    Transient(String),
    Fatal(AppError),
}

/// Exponential backoff holding the remaining retry budget.
struct Backoff {
    delay: Duration,
    factor: f64,
    remaining: u32,
}

impl Backoff {
    fn new(options: &ProviderOptions) -> Self {
        Self {
            delay: options.initial_delay,
            factor: options.backoff_factor,
            remaining: options.max_retries,
        }
    }

    /// Sleep before the next attempt; false once the budget is spent.
    async fn wait(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        tokio::time::sleep(self.delay).await;
        self.delay = self.delay.mul_f64(self.factor);
        true
    }
}

impl LlmClient {
    pub fn new(options: ProviderOptions, transport: Arc<dyn HttpTransport>) -> Self {
        Self { options, transport }
    }

    pub fn chat_model(&self) -> &str {
        &self.options.chat_model
    }

    pub fn embedding_model(&self) -> &str {
        &self.options.embedding_model
    }

    /// Run one chat completion, with retries per the provider policy and
    /// `<think>` spans elided from the returned content.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<ChatOutput, AppError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.options.chat_model).messages(messages);
        if let Some(max_tokens) = max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = temperature {
            args.temperature(temperature);
        }
        let request = args.build()?;
        let body = Bytes::from(serde_json::to_vec(&request)?);

        let mut backoff = Backoff::new(&self.options);
        loop {
            match self.try_chat_once(&body).await {
                Ok(output) => return Ok(output),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => {
                    if !backoff.wait().await {
                        return Err(AppError::UpstreamTransient(format!(
                            "chat completion: {reason}"
                        )));
                    }
                    warn!(reason, "retrying chat completion");
                }
            }
        }
    }

    async fn try_chat_once(&self, body: &Bytes) -> Result<ChatOutput, AttemptError> {
        let response = self
            .post_json("chat/completions", body.clone())
            .await
            .map_err(classify_transport_error)?;
        if !response.is_success() {
            return Err(Self::status_to_attempt_error(&response));
        }

        let parsed: CreateChatCompletionResponse = serde_json::from_slice(&response.body)
            .map_err(|e| {
                AttemptError::Fatal(AppError::LLMParsing(format!(
                    "decoding chat completion response: {e}"
                )))
            })?;

        let zero_usage = parsed
            .usage
            .as_ref()
            .is_none_or(|usage| usage.prompt_tokens == 0 && usage.total_tokens == 0);
        if parsed.choices.is_empty() && zero_usage && parsed.model.is_empty() {
            // An empty 200 with no model id means the gateway routed us
            // nowhere; another attempt would get the same answer.
            return Err(AttemptError::Fatal(AppError::UpstreamPermanent(
                "upstream routing failure: empty completion response".into(),
            )));
        }

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            AttemptError::Fatal(AppError::UpstreamPermanent(
                "chat completion returned no choices".into(),
            ))
        })?;
        let content = choice.message.content.unwrap_or_default();
        let stop_reason = choice
            .finish_reason
            .map(|reason| format!("{reason:?}").to_lowercase());
        let usage = parsed
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();

        Ok(ChatOutput {
            content: strip_think_tags(&content),
            stop_reason,
            usage,
        })
    }

    /// Embed all texts: batched, concurrent, order-preserving. A zero-length
    /// input returns immediately without touching the wire.
    pub async fn embed(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, TokenUsage), AppError> {
        if texts.is_empty() {
            return Ok((Vec::new(), TokenUsage::default()));
        }

        let batches = texts
            .chunks(EMBEDDING_BATCH_SIZE)
            .map(|batch| self.embed_batch(batch));
        let results = try_join_all(batches).await?;

        let mut vectors = Vec::with_capacity(texts.len());
        let mut usage = TokenUsage::default();
        for (batch_vectors, batch_usage) in results {
            vectors.extend(batch_vectors);
            usage.prompt_tokens = usage.prompt_tokens.saturating_add(batch_usage.prompt_tokens);
            usage.total_tokens = usage.total_tokens.saturating_add(batch_usage.total_tokens);
        }

        Ok((vectors, usage))
    }

    async fn embed_batch(
        &self,
        batch: &[String],
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.options.embedding_model)
            .input(batch.to_vec())
            .build()?;
        let body = Bytes::from(serde_json::to_vec(&request)?);

        let mut backoff = Backoff::new(&self.options);
        loop {
            match self.try_embed_once(&body, batch.len()).await {
                Ok(result) => return Ok(result),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => {
                    if !backoff.wait().await {
                        return Err(AppError::UpstreamTransient(format!("embedding: {reason}")));
                    }
                    warn!(reason, "retrying embedding batch");
                }
            }
        }
    }

    async fn try_embed_once(
        &self,
        body: &Bytes,
        expected: usize,
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), AttemptError> {
        let response = self
            .post_json("embeddings", body.clone())
            .await
            .map_err(classify_transport_error)?;
        if !response.is_success() {
            return Err(Self::status_to_attempt_error(&response));
        }

        let parsed: CreateEmbeddingResponse =
            serde_json::from_slice(&response.body).map_err(|e| {
                AttemptError::Fatal(AppError::LLMParsing(format!(
                    "decoding embedding response: {e}"
                )))
            })?;

        if parsed.data.is_empty()
            && parsed.usage.prompt_tokens == 0
            && parsed.usage.total_tokens == 0
            && parsed.model.is_empty()
        {
            return Err(AttemptError::Fatal(AppError::UpstreamPermanent(
                "upstream routing failure: empty embedding response".into(),
            )));
        }

        if parsed.data.len() < expected {
            return Err(AttemptError::Transient(format!(
                "embedding count mismatch: requested {expected}, received {}",
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|entry| entry.index);
        let vectors = data.into_iter().map(|entry| entry.embedding).collect();
        let usage = TokenUsage {
            prompt_tokens: parsed.usage.prompt_tokens,
            total_tokens: parsed.usage.total_tokens,
        };

        Ok((vectors, usage))
    }

    /// One-token round trip confirming the chat capability is reachable.
    pub async fn probe_chat(&self) -> Result<(), AppError> {
        let messages = vec![
            ChatCompletionRequestSystemMessage::from("You are a connectivity probe.").into(),
            ChatCompletionRequestUserMessage::from("ping").into(),
        ];
        self.chat_completion(messages, Some(1), Some(0.0)).await?;
        Ok(())
    }

    /// Minimal embedding round trip confirming the capability is reachable.
    pub async fn probe_embeddings(&self) -> Result<(), AppError> {
        self.embed(&["ping".to_string()]).await?;
        Ok(())
    }

    async fn post_json(
        &self,
        path: &str,
        body: Bytes,
    ) -> Result<crate::utils::http_cache::HttpResponse, AppError> {
        let url = format!("{}/{}", self.options.base_url.trim_end_matches('/'), path);
        let request = HttpRequest::post_json(&url, self.options.api_key.as_deref(), body);
        self.transport.execute(&request).await
    }
}

/// Timeouts and connection-level failures are transient; anything else the
/// transport reports is final.
fn classify_transport_error(outcome: AppError) -> AttemptError {
    match outcome {
        AppError::Reqwest(err) => AttemptError::Transient(err.to_string()),
        other => AttemptError::Fatal(other),
    }
}

impl LlmClient {
    fn status_to_attempt_error(response: &crate::utils::http_cache::HttpResponse) -> AttemptError {
        let snippet: String = String::from_utf8_lossy(&response.body)
            .chars()
            .take(200)
            .collect();
        if RETRYABLE_STATUSES.contains(&response.status) {
            AttemptError::Transient(format!("HTTP {}: {snippet}", response.status))
        } else {
            AttemptError::Fatal(AppError::UpstreamPermanent(format!(
                "HTTP {}: {snippet}",
                response.status
            )))
        }
    }
}

/// Remove `<think>…</think>` spans from model output. A dangling `<think>`
/// loses only the opening tag.
pub fn strip_think_tags(input: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(OPEN) {
        output.push_str(rest.get(..start).unwrap_or_default());
        let after = rest.get(start + OPEN.len()..).unwrap_or_default();
        match after.find(CLOSE) {
            Some(end) => rest = after.get(end + CLOSE.len()..).unwrap_or_default(),
            None => rest = after,
        }
    }
    output.push_str(rest);

    output
}

/// Convenience constructors for the message shapes the enricher sends.
pub fn system_message(content: &str) -> ChatCompletionRequestMessage {
    ChatCompletionRequestSystemMessage::from(content).into()
}

pub fn user_message(content: &str) -> ChatCompletionRequestMessage {
    ChatCompletionRequestUserMessage::from(content).into()
}
