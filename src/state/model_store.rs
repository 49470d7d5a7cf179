use crate::error::{AppError, Result};
use crate::state::ModelStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value envelope written by every model store backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntry {
    pub stored_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl StoredEntry {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            stored_at: Utc::now(),
            bytes,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| AppError::Serialization(format!("Failed to encode stored entry: {}", e)))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        bincode::deserialize(raw)
            .map_err(|e| AppError::Serialization(format!("Failed to decode stored entry: {}", e)))
    }
}

/// Volatile model store backed by a concurrent map
#[derive(Clone, Default)]
pub struct InMemoryModelStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value with an explicit timestamp
    pub fn put_with_timestamp(&self, key: &str, value: Vec<u8>, stored_at: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                stored_at,
                bytes: value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.bytes.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.entries.get(key).map(|entry| entry.stored_at))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
