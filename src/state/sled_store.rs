use crate::error::{AppError, Result};
use crate::state::model_store::StoredEntry;
use crate::state::ModelStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::Db;
use std::path::Path;
use std::sync::Arc;

/// Persistent model store using Sled embedded database
#[derive(Clone)]
pub struct SledModelStore {
    db: Arc<Db>,
    models_tree: sled::Tree,
}

impl SledModelStore {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| AppError::Storage(format!("Failed to open Sled database: {}", e)))?;

        let models_tree = db
            .open_tree("models")
            .map_err(|e| AppError::Storage(format!("Failed to open models tree: {}", e)))?;

        tracing::info!("Initialized Sled model store at {:?}", path.as_ref());

        Ok(Self {
            db: Arc::new(db),
            models_tree,
        })
    }

    fn read_entry(&self, key: &str) -> Result<Option<StoredEntry>> {
        let raw = self
            .models_tree
            .get(key.as_bytes())
            .map_err(|e| AppError::Storage(format!("Failed to read key {}: {}", key, e)))?;

        raw.map(|bytes| StoredEntry::decode(&bytes)).transpose()
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ModelStore for SledModelStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_entry(key)?.map(|entry| entry.bytes))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let encoded = StoredEntry::new(value).encode()?;
        self.models_tree
            .insert(key.as_bytes(), encoded)
            .map_err(|e| AppError::Storage(format!("Failed to write key {}: {}", key, e)))?;
        self.flush().await?;

        tracing::debug!(key = %key, "Stored model entry");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.models_tree
            .contains_key(key.as_bytes())
            .map_err(|e| AppError::Storage(format!("Failed to check key {}: {}", key, e)))
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read_entry(key)?.map(|entry| entry.stored_at))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.models_tree
            .remove(key.as_bytes())
            .map_err(|e| AppError::Storage(format!("Failed to remove key {}: {}", key, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SledModelStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SledModelStore::new(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();

        store.put("types:3", b"payload".to_vec()).await.unwrap();

        assert_eq!(store.get("types:3").await.unwrap(), Some(b"payload".to_vec()));
        assert!(store.exists("types:3").await.unwrap());
        assert!(store.last_modified("types:3").await.unwrap().is_some());
        assert!(store.get("types:4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _temp_dir) = create_test_store();

        store.put("model:1", vec![1]).await.unwrap();
        store.remove("model:1").await.unwrap();

        assert!(!store.exists("model:1").await.unwrap());
        assert!(store.last_modified("model:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        let written_at = {
            let store = SledModelStore::new(&path).unwrap();
            store.put("model:2", vec![4, 5, 6]).await.unwrap();
            store.last_modified("model:2").await.unwrap().unwrap()
        };

        let store = SledModelStore::new(&path).unwrap();
        assert_eq!(store.get("model:2").await.unwrap(), Some(vec![4, 5, 6]));
        assert_eq!(
            store.last_modified("model:2").await.unwrap(),
            Some(written_at)
        );
    }
}
