use std::path::PathBuf;
use std::sync::Arc;

use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use tokio::sync::{Mutex, OnceCell};

use crate::error::AppError;

/// The bundled feature-extraction model emits 768-dimension vectors.
pub const LOCAL_EMBEDDING_DIMENSION: usize = 768;

/// Inference batch size for the in-process model.
const LOCAL_EMBED_BATCH: usize = 32;

/// In-process ONNX embedder.
///
/// Model files are extracted to `cache_dir` on first use; initialization is
/// lazy and single-flight through the `OnceCell`, and inference serializes on
/// the session mutex.
pub struct LocalEmbedder {
    cache_dir: PathBuf,
    model: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            model: OnceCell::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSION
    }

    async fn session(&self) -> Result<&Arc<Mutex<TextEmbedding>>, AppError> {
        self.model
            .get_or_try_init(|| async {
                let cache_dir = self.cache_dir.clone();
                let model = tokio::task::spawn_blocking(move || {
                    std::fs::create_dir_all(&cache_dir)?;
                    let mut options = TextInitOptions::new(EmbeddingModel::BGEBaseENV15);
                    options.cache_dir = cache_dir;
                    options.show_download_progress = false;
                    TextEmbedding::try_new(options)
                        .map_err(|e| AppError::InternalError(e.to_string()))
                })
                .await??;

                Ok::<_, AppError>(Arc::new(Mutex::new(model)))
            })
            .await
    }

    /// Embed the texts in batches of at most 32. The model normalizes its
    /// output vectors.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.session().await?;
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(LOCAL_EMBED_BATCH) {
            let mut guard = session.lock().await;
            let embedded = guard
                .embed(chunk.to_vec(), None)
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}
