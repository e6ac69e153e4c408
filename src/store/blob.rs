//! Key-value blob persistence
//!
//! The durable side of the record store: opaque bytes under a fixed key.

use crate::error::TrackerError;
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for blob persistence
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
}

/// In-memory blob store for development and tests
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(())
    }
}

/// One `{key}.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(TrackerError::StoreError(format!("invalid blob key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait::async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryBlobStore::new();
        assert!(store.get("food_records").await.unwrap().is_none());

        store.put("food_records", b"[]".to_vec()).await.unwrap();
        assert_eq!(store.get("food_records").await.unwrap(), Some(b"[]".to_vec()));
    }

    #[tokio::test]
    async fn test_file_store_creates_dir_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(root.path().join("nested"));

        assert!(store.get("food_records").await.unwrap().is_none());
        store.put("food_records", b"[1]".to_vec()).await.unwrap();
        store.put("food_records", b"[2]".to_vec()).await.unwrap();

        assert_eq!(store.get("food_records").await.unwrap(), Some(b"[2]".to_vec()));
        assert!(root.path().join("nested/food_records.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_keys() {
        let root = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(root.path());

        assert!(store.put("../escape", Vec::new()).await.is_err());
        assert!(store.get("").await.is_err());
    }
}
