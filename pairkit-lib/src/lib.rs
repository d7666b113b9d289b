//! pairkit core library.
//!
//! Building blocks for establishing encrypted, topic-addressed channels
//! between two peers over an untrusted publish/subscribe relay:
//!
//! - **Key management** ([`kms`]): x25519 keypairs, key agreement, per-topic
//!   symmetric keys held in [`secure_storage`].
//! - **Envelopes** ([`envelope`]): topic derivation and the ChaCha20-Poly1305
//!   envelope wire format.
//! - **Relay** ([`relay`]): the transport trait and the subscription manager
//!   that replays subscriptions after reconnects.
//! - **JSON-RPC** ([`rpc`]): request ids, response correlation, timeouts and
//!   the per-method handler registry.
//! - **Pairing** ([`pairing`]): pairing URIs and the pairing lifecycle.
//!
//! Storage and transport are trait-based; the host application injects
//! implementations.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pairkit_lib::kms::KeyManagementService;
//! use pairkit_lib::secure_storage::InMemoryKeyStorage;
//!
//! let kms = KeyManagementService::new(Arc::new(InMemoryKeyStorage::new()));
//! let (topic, key) = kms.create_symmetric_key().await?;
//! assert_eq!(topic, pairkit_lib::envelope::derive_topic(&key));
//! ```

use std::fmt;

pub mod config;
pub mod envelope;
pub mod errors;
pub mod kms;
pub mod pairing;
pub mod prelude;
pub mod relay;
pub mod rpc;
pub mod secure_storage;
pub mod storage;

/// Test utilities: in-memory relay network and fixtures.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{PairkitError, PairkitErrorCode};

/// Common result alias for pairkit operations.
pub type Result<T> = std::result::Result<T, PairkitError>;

/// Relay routing address.
///
/// Topics are lowercase hex SHA-256 digests of key material; see
/// [`envelope::derive_topic`].
///
/// ```
/// use pairkit_lib::Topic;
///
/// let topic: Topic = "7f6e".into();
/// assert_eq!(topic.as_str(), "7f6e");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
