//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use pairkit_lib::prelude::*;
//! ```

// Core types
pub use crate::{Result, Topic};

// Error handling
pub use crate::errors::{PairkitError, PairkitErrorCode};

// Configuration
pub use crate::config::{CoreConfig, PairingConfig, RelayConfig, RpcConfig};

// Keys and envelopes
pub use crate::envelope::{derive_topic, Envelope, EnvelopeKind, EnvelopeSerializer};
pub use crate::kms::{KeyManagementService, PublicKey, SymmetricKey};

// Relay
pub use crate::relay::{ConnectionStatus, InboundMessage, RelaySubscriptionManager, RelayTransport};

// JSON-RPC
pub use crate::rpc::{
    ErrorObject, InboundRequest, NetworkingInteractor, ProtocolMethod, RequestOptions, RpcId,
};

// Pairing
pub use crate::pairing::{AppMetadata, Pairing, PairingEngine, PairingUri};

// Storage
pub use crate::secure_storage::{InMemoryKeyStorage, SecureKeyStorage};
pub use crate::storage::{InMemoryKeyValueStore, KeyValueStore};
