//! JSON-file backed record store
//!
//! The whole data set lives in memory and is written to a single JSON file on
//! [`RecordStore::save`]. Writes go to a temp file first and are renamed over
//! the target, so a crash mid-save never leaves a truncated file behind.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::memory::{Collections, MemoryStore};
use super::{RecordStore, StorageError, StorageResult};

/// Durable record store persisted to one JSON document
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    save_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Load the store from `path`, starting empty if the file is missing
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let collections: Collections = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Collections::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => return Err(StorageError::io(format!("read {}", path.display()), e)),
        };

        tracing::debug!(
            path = %path.display(),
            collections = collections.len(),
            "Opened JSON record store"
        );

        Ok(Self {
            path,
            inner: MemoryStore::from_collections(collections),
            save_lock: Mutex::new(()),
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn list(&self, collection: &str) -> StorageResult<Vec<Value>> {
        self.inner.list(collection).await
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn insert(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        self.inner.insert(collection, id, record).await
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        self.inner.set(collection, id, record).await
    }

    async fn update(&self, collection: &str, id: &str, record: Value) -> StorageResult<()> {
        self.inner.update(collection, id, record).await
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Value,
        record: Value,
    ) -> StorageResult<()> {
        self.inner.replace_if(collection, id, expected, record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.inner.delete(collection, id).await
    }

    async fn save(&self) -> StorageResult<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.inner.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(format!("create {}", parent.display()), e))?;
        }

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| StorageError::io(format!("write {}", temp_path.display()), e))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StorageError::io(format!("rename {}", self.path.display()), e))?;

        tracing::debug!(path = %self.path.display(), "Saved JSON record store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("herald.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.insert("campaigns", "launch", json!({"id": "launch"})).await.unwrap();
        store.save().await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested").join("herald.json.tmp").exists());

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("campaigns", "launch").await.unwrap(),
            Some(json!({"id": "launch"}))
        );
    }

    #[tokio::test]
    async fn test_unsaved_changes_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.insert("campaigns", "a", json!({})).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(reopened.list("campaigns").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
