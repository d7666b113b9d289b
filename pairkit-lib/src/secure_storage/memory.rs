//! In-memory secret storage.
//!
//! Secrets are held in process memory only and wiped on removal. Suitable for
//! tests and clients that re-pair on every start.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::traits::{
    SecureKeyStorage, SecureStorageError, SecureStorageErrorCode, SecureStorageResult,
    StoreOptions,
};

/// In-memory implementation of [`SecureKeyStorage`].
pub struct InMemoryKeyStorage {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

fn lock_error(context: &str) -> SecureStorageError {
    SecureStorageError::new(
        SecureStorageErrorCode::Internal,
        format!("InMemoryKeyStorage: lock poisoned during {}", context),
    )
}

impl InMemoryKeyStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored secrets. Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    /// Whether nothing is stored. Returns true if the lock is poisoned.
    pub fn is_empty(&self) -> bool {
        self.keys.read().map(|k| k.is_empty()).unwrap_or(true)
    }
}

impl Default for InMemoryKeyStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureKeyStorage for InMemoryKeyStorage {
    async fn store(
        &self,
        key_id: &str,
        key_data: &[u8],
        options: StoreOptions,
    ) -> SecureStorageResult<()> {
        let mut keys = self.keys.write().map_err(|_| lock_error("store"))?;

        if keys.contains_key(key_id) && !options.overwrite {
            return Err(SecureStorageError::already_exists(key_id));
        }

        keys.insert(key_id.to_string(), Zeroizing::new(key_data.to_vec()));
        Ok(())
    }

    async fn retrieve(&self, key_id: &str) -> SecureStorageResult<Option<Zeroizing<Vec<u8>>>> {
        let keys = self.keys.read().map_err(|_| lock_error("retrieve"))?;
        Ok(keys.get(key_id).cloned())
    }

    async fn delete(&self, key_id: &str) -> SecureStorageResult<()> {
        let mut keys = self.keys.write().map_err(|_| lock_error("delete"))?;

        if keys.remove(key_id).is_some() {
            Ok(())
        } else {
            Err(SecureStorageError::not_found(key_id))
        }
    }

    async fn exists(&self, key_id: &str) -> SecureStorageResult<bool> {
        let keys = self.keys.read().map_err(|_| lock_error("exists"))?;
        Ok(keys.contains_key(key_id))
    }

    async fn list_keys(&self) -> SecureStorageResult<Vec<String>> {
        let keys = self.keys.read().map_err(|_| lock_error("list_keys"))?;
        Ok(keys.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let storage = InMemoryKeyStorage::new();

        storage
            .store("sym:topic", &[1u8; 32], StoreOptions::new())
            .await
            .unwrap();

        let retrieved = storage.retrieve("sym:topic").await.unwrap().unwrap();
        assert_eq!(retrieved.as_slice(), &[1u8; 32]);
        assert_eq!(storage.retrieve("sym:other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_overwrite_without_option() {
        let storage = InMemoryKeyStorage::new();

        storage
            .store("priv:aa", b"first", StoreOptions::new())
            .await
            .unwrap();
        let err = storage
            .store("priv:aa", b"second", StoreOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, SecureStorageErrorCode::AlreadyExists);

        storage
            .store("priv:aa", b"second", StoreOptions::new().overwrite())
            .await
            .unwrap();
        let retrieved = storage.retrieve("priv:aa").await.unwrap().unwrap();
        assert_eq!(retrieved.as_slice(), b"second");
    }

    #[tokio::test]
    async fn test_delete_and_delete_if_exists() {
        let storage = InMemoryKeyStorage::new();

        storage
            .store("agreement:t", b"data", StoreOptions::new())
            .await
            .unwrap();
        assert!(storage.exists("agreement:t").await.unwrap());

        storage.delete("agreement:t").await.unwrap();
        assert!(!storage.exists("agreement:t").await.unwrap());
        assert!(storage.delete("agreement:t").await.unwrap_err().is_not_found());

        storage.delete_if_exists("agreement:t").await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_list_keys() {
        let storage = InMemoryKeyStorage::new();

        for id in ["sym:1", "sym:2", "priv:3"] {
            storage.store(id, b"x", StoreOptions::new()).await.unwrap();
        }

        let mut keys = storage.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["priv:3", "sym:1", "sym:2"]);
        assert_eq!(storage.len(), 3);
    }
}
