//! Record store abstraction
//!
//! Campaigns and tasks are persisted as JSON records in named collections.
//! Business logic talks to the [`RecordStore`] trait only, so stages can run
//! against the in-memory [`MemoryStore`] in tests and the durable
//! [`JsonFileStore`] in production.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   pipeline stages / campaign CRUD / server   │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │  campaign::db, task::db (typed accessors)    │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │               RecordStore trait              │
//! └──────────────────────────────────────────────┘
//!             │                      │
//!             ▼                      ▼
//!      ┌─────────────┐       ┌───────────────┐
//!      │ MemoryStore │       │ JsonFileStore │
//!      └─────────────┘       └───────────────┘
//! ```
//!
//! Every read returns an owned copy. Writes that must not clobber a
//! concurrent change go through [`RecordStore::replace_if`], which compares
//! the stored record with the one the caller last observed.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Collection holding campaigns
pub const CAMPAIGNS: &str = "campaigns";

/// Collection holding campaign tasks
pub const CAMPAIGN_TASKS: &str = "campaign-tasks";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by record stores
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record with the same id already exists
    #[error("Record '{id}' already exists in '{collection}'")]
    AlreadyExists { collection: String, id: String },

    /// Record does not exist
    #[error("Record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    /// Stored record changed since it was read
    #[error("Record '{id}' in '{collection}' was modified concurrently")]
    Conflict { collection: String, id: String },

    /// Record could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing file could not be read or written
    #[error("I/O error during '{operation}': {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn already_exists(collection: &str, id: &str) -> Self {
        Self::AlreadyExists {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(collection: &str, id: &str) -> Self {
        Self::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Io { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// Record Store Trait
// ============================================================================

/// Predicate over stored records
pub type RecordPredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Collection-oriented JSON record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of a collection, ordered by id
    async fn list(&self, collection: &str) -> StorageResult<Vec<Value>>;

    /// Records matching a predicate
    async fn filter(
        &self,
        collection: &str,
        predicate: RecordPredicate<'_>,
    ) -> StorageResult<Vec<Value>> {
        let records = self.list(collection).await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Single record by id
    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>>;

    /// Create a record, failing if the id is taken
    async fn insert(&self, collection: &str, id: &str, record: Value) -> StorageResult<()>;

    /// Create or overwrite a record
    async fn set(&self, collection: &str, id: &str, record: Value) -> StorageResult<()>;

    /// Overwrite an existing record
    async fn update(&self, collection: &str, id: &str, record: Value) -> StorageResult<()>;

    /// Overwrite a record only if it still equals `expected`
    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Value,
        record: Value,
    ) -> StorageResult<()>;

    /// Remove a record, returns whether it existed
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool>;

    /// Flush to durable storage
    async fn save(&self) -> StorageResult<()>;
}

/// Thread-safe shared store
pub type SharedStore = Arc<dyn RecordStore>;

/// Create a shared in-memory store
pub fn create_memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// Open (or create) a shared JSON-file store
pub async fn create_json_store(path: impl AsRef<Path>) -> StorageResult<SharedStore> {
    let store = JsonFileStore::open(path).await?;
    Ok(Arc::new(store))
}

// ============================================================================
// Typed Helpers
// ============================================================================

/// Serialize a value into a record
pub fn to_record<T: Serialize>(value: &T) -> StorageResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Deserialize a record into a value
pub fn from_record<T: DeserializeOwned>(record: Value) -> StorageResult<T> {
    Ok(serde_json::from_value(record)?)
}

/// Deserialize a list of records
pub fn from_records<T: DeserializeOwned>(records: Vec<Value>) -> StorageResult<Vec<T>> {
    records.into_iter().map(from_record).collect()
}

// ============================================================================
// Tests
// ============================================================================
