//! In-memory record store

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{RecordStore, StorageError, StorageResult};

/// Collection name → record id → record
pub(crate) type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Record store kept entirely in memory
///
/// `save` is a no-op. Used by tests and as the working set of
/// [`super::JsonFileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    /// Copy of every collection
    pub(crate) async fn snapshot(&self) -> Collections {
        self.collections.read().await.clone()
    }

    /// Number of records in a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Remove everything
    pub async fn clear(&self) {
        self.collections.write().await.clear();
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, collection: &str) -> StorageResult<Vec<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|records| records.get(id)).cloned())
    }

    async fn insert(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();

        if records.contains_key(id) {
            return Err(StorageError::already_exists(collection, id));
        }

        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let slot = collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| StorageError::not_found(collection, id))?;

        *slot = record;
        Ok(())
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Value,
        record: Value,
    ) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let slot = collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| StorageError::not_found(collection, id))?;

        if slot != expected {
            return Err(StorageError::conflict(collection, id));
        }

        *slot = record;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .is_some())
    }

    async fn save(&self) -> StorageResult<()> {
        Ok(())
    }
}
