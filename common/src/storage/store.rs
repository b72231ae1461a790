use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

pub type DynStore = Arc<dyn ObjectStore>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    Memory,
}

/// Durable byte store backing the HTTP response cache.
///
/// The local backend keeps objects under a base directory; the memory backend
/// exists for tests and lives as long as the manager.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a local filesystem backend rooted at `base`.
    pub fn local(base: &Path) -> object_store::Result<Self> {
        std::fs::create_dir_all(base).map_err(|source| object_store::Error::Generic {
            store: "LocalFileSystem",
            source: Box::new(source),
        })?;
        let store = LocalFileSystem::new_with_prefix(base)?;

        Ok(Self {
            store: Arc::new(store),
            backend_kind: StorageKind::Local,
            local_base: Some(base.to_path_buf()),
        })
    }

    /// Create an in-memory backend.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            backend_kind: StorageKind::Memory,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Delete all objects below the specified prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_round_trips_bytes() {
        let store = StorageManager::memory();

        store
            .put("cache/ab/key.json", Bytes::from_static(b"payload"))
            .await
            .expect("put should succeed");

        assert!(store
            .exists("cache/ab/key.json")
            .await
            .expect("exists should succeed"));

        let fetched = store
            .get("cache/ab/key.json")
            .await
            .expect("get should succeed");
        assert_eq!(fetched, Bytes::from_static(b"payload"));

        store
            .delete_prefix("cache")
            .await
            .expect("delete should succeed");
        assert!(!store
            .exists("cache/ab/key.json")
            .await
            .expect("exists should succeed"));
    }

    #[tokio::test]
    async fn local_backend_persists_under_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StorageManager::local(dir.path()).expect("local store");

        store
            .put("cache/xy/entry.json", Bytes::from_static(b"{}"))
            .await
            .expect("put should succeed");

        assert_eq!(store.backend_kind(), &StorageKind::Local);
        assert!(dir.path().join("cache/xy/entry.json").exists());
    }
}
