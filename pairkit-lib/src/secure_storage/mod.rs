//! Secret storage for key material.
//!
//! Private keys, symmetric topic keys and agreement secrets never go through
//! the general [`KeyValueStore`](crate::storage::KeyValueStore); they live in
//! a [`SecureKeyStorage`] implementation supplied by the host application
//! (platform keychain, HSM, encrypted file...). [`InMemoryKeyStorage`] is
//! provided for tests and ephemeral clients.
//!
//! ```rust,ignore
//! use pairkit_lib::secure_storage::{InMemoryKeyStorage, SecureKeyStorage, StoreOptions};
//!
//! let storage = InMemoryKeyStorage::new();
//! storage.store("sym:abcd", &[7u8; 32], StoreOptions::new().overwrite()).await?;
//! let key = storage.retrieve("sym:abcd").await?;
//! ```

mod memory;
mod traits;

pub use memory::InMemoryKeyStorage;
pub use traits::{
    SecureKeyStorage, SecureStorageError, SecureStorageErrorCode, SecureStorageResult,
    StoreOptions,
};
