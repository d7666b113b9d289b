//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{KeyValueStore, StorageError, StorageResult};

type Collections = HashMap<String, HashMap<String, serde_json::Value>>;

/// [`KeyValueStore`] held in process memory.
///
/// Useful for tests and short-lived clients. Data is not persisted across
/// restarts.
pub struct InMemoryKeyValueStore {
    collections: RwLock<Collections>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, collection: &str, key: &str) -> StorageResult<Option<serde_json::Value>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(key))
            .cloned())
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> StorageResult<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        if let Some(records) = collections.get_mut(collection) {
            records.remove(key);
        }
        Ok(())
    }

    async fn get_all(&self, collection: &str) -> StorageResult<Vec<(String, serde_json::Value)>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryKeyValueStore::new();

        store.set("pairings", "t1", json!({"a": 1})).await.unwrap();
        store.set("sessions", "t1", json!({"b": 2})).await.unwrap();

        assert_eq!(
            store.get("pairings", "t1").await.unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            store.get("sessions", "t1").await.unwrap(),
            Some(json!({"b": 2}))
        );

        store.delete("pairings", "t1").await.unwrap();
        assert_eq!(store.get("pairings", "t1").await.unwrap(), None);
        assert_eq!(store.get_all("sessions").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = InMemoryKeyValueStore::new();
        store.delete("nothing", "here").await.unwrap();
        assert!(store.get_all("nothing").await.unwrap().is_empty());
    }
}
