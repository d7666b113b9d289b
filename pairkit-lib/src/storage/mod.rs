//! Persistent key-value storage for pairings, sessions and subscribed topics.
//!
//! The host application supplies a [`KeyValueStore`]; records are grouped in
//! named collections and stored as JSON values. [`TypedStore`] adds a typed
//! view over one collection.

mod memory;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::PairkitError;

pub use memory::InMemoryKeyValueStore;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<StorageError> for PairkitError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Serialization(msg) => PairkitError::Serialization(msg),
            other => PairkitError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Generic collection-scoped key-value store.
///
/// Implementations must allow concurrent reads and serialize writes per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read one record.
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Insert or replace one record.
    async fn set(&self, collection: &str, key: &str, value: serde_json::Value)
        -> StorageResult<()>;

    /// Remove one record. Removing a missing key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()>;

    /// Snapshot every record in a collection.
    async fn get_all(&self, collection: &str) -> StorageResult<Vec<(String, serde_json::Value)>>;
}

/// Typed view over one collection of a [`KeyValueStore`].
pub struct TypedStore<T> {
    inner: Arc<dyn KeyValueStore>,
    collection: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            collection: self.collection,
            _marker: PhantomData,
        }
    }
}

impl<T> TypedStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Bind a collection name to a record type.
    pub fn new(inner: Arc<dyn KeyValueStore>, collection: &'static str) -> Self {
        Self {
            inner,
            collection,
            _marker: PhantomData,
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<T>> {
        match self.inner.get(self.collection, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, record: &T) -> StorageResult<()> {
        let value = serde_json::to_value(record)?;
        self.inner.set(self.collection, key, value).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(self.collection, key).await
    }

    /// All records in the collection. Entries that no longer deserialize are
    /// skipped with a warning.
    pub async fn get_all(&self) -> StorageResult<Vec<T>> {
        let entries = self.inner.get_all(self.collection).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(collection = self.collection, %key, error = %e, "skipping unreadable record")
                }
            }
        }
        Ok(records)
    }

    /// All keys in the collection.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = self.inner.get_all(self.collection).await?;
        Ok(entries.into_iter().map(|(key, _)| key).collect())
    }
}
