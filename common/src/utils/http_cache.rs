use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, storage::store::StorageManager};

/// A provider call, reduced to what the cache key and the wire need.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub bearer_token: Option<String>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn post_json(url: &str, bearer_token: Option<&str>, body: Bytes) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.to_string(),
            bearer_token: bearer_token.map(str::to_string),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The round-trip seam of the provider layer. The caching wrapper interposes
/// here, and tests substitute counting fakes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AppError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
        let mut builder = match request.method.as_str() {
            "POST" => self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body.clone()),
            "GET" => self.client.get(&request.url),
            other => {
                return Err(AppError::Validation(format!(
                    "unsupported transport method {other}"
                )))
            }
        };
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Serialized form of a cached response: status, headers and a base64 body.
#[derive(Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Content-keyed HTTP response cache.
///
/// The key is SHA-256 over (method, url, body). Only POST requests with 2xx
/// responses are cached. Cache read and write failures fall through to the
/// inner transport and are never surfaced to the caller; reads run
/// concurrently while writes serialize per key.
pub struct CachingTransport<T> {
    inner: T,
    store: StorageManager,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: HttpTransport> CachingTransport<T> {
    pub fn new(inner: T, store: StorageManager) -> Self {
        Self {
            inner,
            store,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(request: &HttpRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.method.as_bytes());
        hasher.update(b"\n");
        hasher.update(request.url.as_bytes());
        hasher.update(b"\n");
        hasher.update(&request.body);
        let digest = hasher.finalize();
        format!("{digest:x}")
    }

    fn cache_location(key: &str) -> String {
        let shard = key.get(..2).unwrap_or("00");
        format!("http-cache/{shard}/{key}.json")
    }

    async fn read_cached(&self, location: &str) -> Option<HttpResponse> {
        let raw = match self.store.get(location).await {
            Ok(bytes) => bytes,
            Err(object_store::Error::NotFound { .. }) => return None,
            Err(err) => {
                debug!(error = %err, location, "cache read failed; falling through");
                return None;
            }
        };

        let cached: CachedResponse = match serde_json::from_slice(&raw) {
            Ok(cached) => cached,
            Err(err) => {
                debug!(error = %err, location, "cache entry unreadable; falling through");
                return None;
            }
        };
        let body = match BASE64.decode(cached.body.as_bytes()) {
            Ok(body) => Bytes::from(body),
            Err(err) => {
                debug!(error = %err, location, "cache body undecodable; falling through");
                return None;
            }
        };

        Some(HttpResponse {
            status: cached.status,
            headers: cached.headers,
            body,
        })
    }

    async fn write_cached(&self, key: &str, location: &str, response: &HttpResponse) {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        let cached = CachedResponse {
            status: response.status,
            headers: response.headers.clone(),
            body: BASE64.encode(&response.body),
        };
        let serialized = match serde_json::to_vec(&cached) {
            Ok(serialized) => serialized,
            Err(err) => {
                debug!(error = %err, location, "cache entry unserializable; skipping write");
                return;
            }
        };

        if let Err(err) = self.store.put(location, Bytes::from(serialized)).await {
            debug!(error = %err, location, "cache write failed; skipping");
        }
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for CachingTransport<T> {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
        if request.method != "POST" {
            return self.inner.execute(request).await;
        }

        let key = Self::cache_key(request);
        let location = Self::cache_location(&key);

        if let Some(hit) = self.read_cached(&location).await {
            return Ok(hit);
        }

        let response = self.inner.execute(request).await?;
        if response.is_success() {
            self.write_cached(&key, &location, &response).await;
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream fake that counts calls and replies with a fixed response.
    struct CountingTransport {
        calls: AtomicUsize,
        status: u16,
    }

    impl CountingTransport {
        fn new(status: u16) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for &CountingTransport {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: self.status,
                headers: vec![("content-type".into(), "application/json".into())],
                body: Bytes::from(format!("echo:{}", String::from_utf8_lossy(&request.body))),
            })
        }
    }

    fn embeddings_request() -> HttpRequest {
        HttpRequest::post_json(
            "https://api.example.com/v1/embeddings",
            Some("sk-test"),
            Bytes::from_static(br#"{"input":"hello"}"#),
        )
    }

    #[tokio::test]
    async fn identical_posts_hit_upstream_once() {
        let upstream = CountingTransport::new(200);
        let transport = CachingTransport::new(&upstream, StorageManager::memory());

        let request = embeddings_request();
        let first = transport.execute(&request).await.expect("first call");
        let second = transport.execute(&request).await.expect("second call");
        let third = transport.execute(&request).await.expect("third call");

        assert_eq!(upstream.calls(), 1);
        assert_eq!(first.body, second.body);
        assert_eq!(second.body, third.body);
        assert_eq!(third.status, 200);
    }

    #[tokio::test]
    async fn different_bodies_are_distinct_entries() {
        let upstream = CountingTransport::new(200);
        let transport = CachingTransport::new(&upstream, StorageManager::memory());

        transport
            .execute(&embeddings_request())
            .await
            .expect("first call");
        let other = HttpRequest::post_json(
            "https://api.example.com/v1/embeddings",
            Some("sk-test"),
            Bytes::from_static(br#"{"input":"goodbye"}"#),
        );
        transport.execute(&other).await.expect("second call");

        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn non_success_responses_bypass_the_cache() {
        let upstream = CountingTransport::new(503);
        let transport = CachingTransport::new(&upstream, StorageManager::memory());

        let request = embeddings_request();
        transport.execute(&request).await.expect("first call");
        transport.execute(&request).await.expect("second call");

        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn non_post_requests_bypass_the_cache() {
        let upstream = CountingTransport::new(200);
        let transport = CachingTransport::new(&upstream, StorageManager::memory());

        let request = HttpRequest {
            method: "GET".to_string(),
            url: "https://api.example.com/v1/models".to_string(),
            bearer_token: None,
            body: Bytes::new(),
        };
        transport.execute(&request).await.expect("first call");
        transport.execute(&request).await.expect("second call");

        assert_eq!(upstream.calls(), 2);
    }
}
