use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::AppError;
use crate::utils::llm::LlmClient;
use crate::utils::local_embedder::LocalEmbedder;

/// Embedding backend selected at startup: the remote provider endpoint, the
/// in-process fastembed model, or the deterministic hashed fallback used in
/// tests and offline smoke runs.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    Remote {
        client: Arc<LlmClient>,
        dimension: usize,
    },
    Local {
        embedder: Arc<LocalEmbedder>,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn remote(client: Arc<LlmClient>, dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Remote { client, dimension },
        }
    }

    pub fn local(embedder: Arc<LocalEmbedder>) -> Self {
        Self {
            inner: EmbeddingInner::Local { embedder },
        }
    }

    pub fn hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match &self.inner {
            EmbeddingInner::Remote { .. } => "remote",
            EmbeddingInner::Local { .. } => "fastembed",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Remote { dimension, .. } => *dimension,
            EmbeddingInner::Local { embedder } => embedder.dimension(),
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::InternalError("no embedding returned for input".into()))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.inner {
            EmbeddingInner::Remote { client, .. } => {
                let (vectors, _usage) = client.embed(&texts).await?;
                Ok(vectors)
            }
            EmbeddingInner::Local { embedder } => embedder.embed_batch(texts).await,
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
        }
    }

    pub async fn probe(&self) -> Result<(), AppError> {
        match &self.inner {
            EmbeddingInner::Remote { client, .. } => client.probe_embeddings().await,
            EmbeddingInner::Local { embedder } => {
                embedder.embed_batch(vec!["ping".to_string()]).await?;
                Ok(())
            }
            EmbeddingInner::Hashed { .. } => Ok(()),
        }
    }
}

/// Bag-of-words vector from token hashes, L2-normalized. Deterministic across
/// processes, which is all the offline backend promises.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for token in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let bucket = usize::try_from(hasher.finish()).unwrap_or(usize::MAX) % vector.len();
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
