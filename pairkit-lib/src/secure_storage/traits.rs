//! Core trait for secret storage.

use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::errors::PairkitError;

/// Error codes for secure storage operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SecureStorageErrorCode {
    /// Key not found
    NotFound = 1000,
    /// Access denied by the platform
    AccessDenied = 2000,
    /// Key already exists
    AlreadyExists = 3000,
    /// Internal error
    Internal = 9999,
}

/// Error type for secure storage operations.
#[derive(Debug)]
pub struct SecureStorageError {
    /// Error code
    pub code: SecureStorageErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Key identifier related to the error, if any
    pub key_id: Option<String>,
}

impl SecureStorageError {
    /// Create a new error.
    pub fn new(code: SecureStorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key_id: None,
        }
    }

    /// Create a "not found" error.
    pub fn not_found(key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        Self {
            code: SecureStorageErrorCode::NotFound,
            message: format!("Key not found: {}", key_id),
            key_id: Some(key_id),
        }
    }

    /// Create an "already exists" error.
    pub fn already_exists(key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        Self {
            code: SecureStorageErrorCode::AlreadyExists,
            message: format!("Key already exists: {}", key_id),
            key_id: Some(key_id),
        }
    }

    /// Check if this error indicates the key wasn't found.
    pub fn is_not_found(&self) -> bool {
        self.code == SecureStorageErrorCode::NotFound
    }
}

impl fmt::Display for SecureStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(key_id) = &self.key_id {
            write!(f, "{} (key: {})", self.message, key_id)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for SecureStorageError {}

impl From<SecureStorageError> for PairkitError {
    fn from(err: SecureStorageError) -> Self {
        match (err.code, err.key_id) {
            (SecureStorageErrorCode::NotFound, Some(key_id)) => PairkitError::KeyNotFound(key_id),
            (_, _) => PairkitError::Storage(err.message),
        }
    }
}

/// Result type for secure storage operations.
pub type SecureStorageResult<T> = Result<T, SecureStorageError>;

/// Options for storing a secret.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Overwrite if the identifier already exists
    pub overwrite: bool,
}

impl StoreOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow overwriting existing secrets.
    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

/// Storage for secret key material, isolated from the general key-value
/// store.
///
/// Implementations must allow concurrent reads and serialize writes to the
/// same identifier. Secret bytes handed back are wrapped in [`Zeroizing`] so
/// they are wiped when the caller drops them.
#[async_trait]
pub trait SecureKeyStorage: Send + Sync {
    /// Store a secret under `key_id`.
    ///
    /// # Errors
    /// `AlreadyExists` if the identifier is taken and `options.overwrite` is
    /// false.
    async fn store(
        &self,
        key_id: &str,
        key_data: &[u8],
        options: StoreOptions,
    ) -> SecureStorageResult<()>;

    /// Retrieve a secret, or `None` if nothing is stored under `key_id`.
    async fn retrieve(&self, key_id: &str) -> SecureStorageResult<Option<Zeroizing<Vec<u8>>>>;

    /// Delete a secret.
    ///
    /// # Errors
    /// `NotFound` if nothing is stored under `key_id`.
    async fn delete(&self, key_id: &str) -> SecureStorageResult<()>;

    /// Check whether a secret exists.
    async fn exists(&self, key_id: &str) -> SecureStorageResult<bool> {
        Ok(self.retrieve(key_id).await?.is_some())
    }

    /// List all stored identifiers.
    async fn list_keys(&self) -> SecureStorageResult<Vec<String>>;

    /// Delete a secret if it exists; missing identifiers are not an error.
    async fn delete_if_exists(&self, key_id: &str) -> SecureStorageResult<()> {
        match self.delete(key_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SecureStorageError::not_found("sym:abcd");
        assert!(err.is_not_found());
        assert_eq!(err.key_id, Some("sym:abcd".to_string()));
    }

    #[test]
    fn test_not_found_maps_to_key_not_found() {
        let err: PairkitError = SecureStorageError::not_found("priv:00ff").into();
        assert!(matches!(err, PairkitError::KeyNotFound(id) if id == "priv:00ff"));

        let err: PairkitError =
            SecureStorageError::new(SecureStorageErrorCode::AccessDenied, "locked").into();
        assert!(matches!(err, PairkitError::Storage(_)));
    }
}
