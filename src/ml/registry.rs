use crate::error::Result;
use crate::ml::models::{FrequencyTable, TrainedModel};
use crate::state::ModelStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

/// Which frequency table of a delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyKind {
    Types,
    Locations,
}

impl FrequencyKind {
    fn prefix(&self) -> &'static str {
        match self {
            FrequencyKind::Types => "types",
            FrequencyKind::Locations => "locations",
        }
    }
}

/// Typed access to the model store.
///
/// Each delegation owns three independent entries: `model:<id>`,
/// `types:<id>` and `locations:<id>`. Writes overwrite unconditionally.
#[derive(Clone)]
pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }

    pub fn model_key(delegation_id: i64) -> String {
        format!("model:{}", delegation_id)
    }

    pub fn frequency_key(kind: FrequencyKind, delegation_id: i64) -> String {
        format!("{}:{}", kind.prefix(), delegation_id)
    }

    /// Persisted model of a delegation together with when it was written
    pub async fn load_model(
        &self,
        delegation_id: i64,
    ) -> Result<Option<(TrainedModel, DateTime<Utc>)>> {
        let key = Self::model_key(delegation_id);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let Some(stored_at) = self.store.last_modified(&key).await? else {
            warn!(delegation_id, key = %key, "Model entry has no write timestamp, ignoring it");
            return Ok(None);
        };

        let model: TrainedModel = bincode::deserialize(&bytes)?;
        Ok(Some((model, stored_at)))
    }

    pub async fn save_model(&self, model: &TrainedModel) -> Result<()> {
        let bytes = bincode::serialize(model)?;
        self.store
            .put(&Self::model_key(model.delegation_id), bytes)
            .await
    }

    pub async fn load_frequencies(
        &self,
        kind: FrequencyKind,
        delegation_id: i64,
    ) -> Result<Option<FrequencyTable>> {
        match self
            .store
            .get(&Self::frequency_key(kind, delegation_id))
            .await?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_frequencies(
        &self,
        kind: FrequencyKind,
        delegation_id: i64,
        table: &FrequencyTable,
    ) -> Result<()> {
        let bytes = bincode::serialize(table)?;
        self.store
            .put(&Self::frequency_key(kind, delegation_id), bytes)
            .await
    }

    /// Drop every entry of a delegation
    pub async fn remove_all(&self, delegation_id: i64) -> Result<()> {
        self.store.remove(&Self::model_key(delegation_id)).await?;
        for kind in [FrequencyKind::Types, FrequencyKind::Locations] {
            self.store
                .remove(&Self::frequency_key(kind, delegation_id))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryModelStore;

    #[test]
    fn test_keys() {
        assert_eq!(ModelRegistry::model_key(4), "model:4");
        assert_eq!(
            ModelRegistry::frequency_key(FrequencyKind::Types, 4),
            "types:4"
        );
        assert_eq!(
            ModelRegistry::frequency_key(FrequencyKind::Locations, 4),
            "locations:4"
        );
    }

    #[tokio::test]
    async fn test_frequency_roundtrip() {
        let registry = ModelRegistry::new(Arc::new(InMemoryModelStore::new()));
        let table = FrequencyTable::from_counts(vec![("Robo", 4), ("Asalto", 1)]);

        assert!(registry
            .load_frequencies(FrequencyKind::Types, 1)
            .await
            .unwrap()
            .is_none());

        registry
            .save_frequencies(FrequencyKind::Types, 1, &table)
            .await
            .unwrap();

        let loaded = registry
            .load_frequencies(FrequencyKind::Types, 1)
            .await
            .unwrap();
        assert_eq!(loaded, Some(table));
        assert!(registry
            .load_frequencies(FrequencyKind::Locations, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_model() {
        let registry = ModelRegistry::new(Arc::new(InMemoryModelStore::new()));
        assert!(registry.load_model(9).await.unwrap().is_none());
    }

    /// Store that keeps bytes but never reports when they were written
    struct UntimedStore(InMemoryModelStore);

    #[async_trait::async_trait]
    impl ModelStore for UntimedStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.0.put(key, value).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.0.exists(key).await
        }

        async fn last_modified(&self, _key: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_model_without_timestamp_is_absent() {
        let store = Arc::new(UntimedStore(InMemoryModelStore::new()));
        store.put("model:4", vec![1, 2, 3]).await.unwrap();

        let registry = ModelRegistry::new(store);
        assert!(registry.load_model(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_model_is_an_error() {
        let store = Arc::new(InMemoryModelStore::new());
        store.put("model:2", vec![0xde, 0xad]).await.unwrap();

        let registry = ModelRegistry::new(store);
        assert!(registry.load_model(2).await.is_err());
    }
}
