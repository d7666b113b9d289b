//! Session negotiation on top of pairkit pairings.
//!
//! A proposer (typically a dapp) asks for capabilities expressed as CAIP-2
//! namespaces over a pairing; an approver (typically a wallet) grants a set of
//! session namespaces, and both sides then exchange JSON-RPC requests and
//! events on a dedicated session topic.
//!
//! - [`namespaces`]: namespace types, validation and auto-approval
//! - [`session`]: the session engine and its wire types
//! - [`client`]: [`SignClient`], which wires every layer together
//!
//! # Example
//!
//! ```ignore
//! let wallet = SignClient::new(config, transport, store, secure).await?;
//! let mut events = wallet.events();
//! wallet.pair(&uri).await?;
//! if let Ok(SignEvent::SessionProposal(proposal)) = events.recv().await {
//!     let granted = build_auto(&proposal.required_namespaces, None, &chains, &methods, &events, &accounts)?;
//!     wallet.sessions().approve(proposal.id, granted, None).await?;
//! }
//! ```

use pairkit_lib::rpc::{error_codes, ErrorObject};
use pairkit_lib::PairkitError;

pub mod client;
pub mod config;
pub mod namespaces;
pub mod session;

pub use client::SignClient;
pub use config::SignConfig;
pub use namespaces::{AutoNamespacesError, UnsupportedNamespace};

/// Result alias for sign operations.
pub type Result<T> = std::result::Result<T, SignError>;

/// Reason codes sent in rejection, delete and error responses.
pub mod reasons {
    use pairkit_lib::rpc::ErrorObject;

    pub const USER_REJECTED: i64 = 5000;
    pub const UNSUPPORTED_CHAINS: i64 = 5100;
    pub const UNSUPPORTED_METHODS: i64 = 5101;
    pub const UNSUPPORTED_EVENTS: i64 = 5102;
    pub const UNSUPPORTED_ACCOUNTS: i64 = 5103;
    pub const UNSUPPORTED_NAMESPACE_KEY: i64 = 5104;
    pub const UNAUTHORIZED_METHOD: i64 = 3001;
    pub const UNAUTHORIZED_EVENT: i64 = 3002;
    pub const UNAUTHORIZED_UPDATE: i64 = 3003;
    pub const UNAUTHORIZED_EXTEND: i64 = 3005;
    pub const USER_DISCONNECTED: i64 = 6000;
    pub const SESSION_SETTLEMENT_FAILED: i64 = 7000;
    pub const NO_SESSION_FOR_TOPIC: i64 = 7001;
    pub const NO_MATCHING_KEY: i64 = 1302;

    pub fn user_rejected() -> ErrorObject {
        ErrorObject::new(USER_REJECTED, "User rejected.")
    }

    pub fn user_disconnected() -> ErrorObject {
        ErrorObject::new(USER_DISCONNECTED, "User disconnected.")
    }
}

/// Operations only the controller, or only a granted namespace, may perform.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Unauthorized {
    #[error("method {method} is not granted on {chain}")]
    Method { chain: String, method: String },
    #[error("event {event} is not granted on {chain}")]
    Event { chain: String, event: String },
    #[error("only the controller may update a session")]
    Update,
    #[error("only the controller may extend a session")]
    Extend,
}

/// Errors from session negotiation and session operations.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error(transparent)]
    Core(#[from] PairkitError),

    #[error(transparent)]
    UnsupportedNamespace(#[from] UnsupportedNamespace),

    #[error(transparent)]
    AutoNamespaces(#[from] AutoNamespacesError),

    #[error("session properties must not be empty")]
    EmptySessionProperties,

    #[error("no pending proposal with id {0}")]
    ProposalNotFound(String),

    #[error("proposal {0} expired")]
    ProposalExpired(String),

    #[error("no session for topic {0}")]
    SessionNotFound(String),

    #[error("session {0} expired")]
    SessionExpired(String),

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] Unauthorized),

    #[error("invalid session expiry {0}")]
    InvalidExpiry(i64),
}

impl From<pairkit_lib::storage::StorageError> for SignError {
    fn from(e: pairkit_lib::storage::StorageError) -> Self {
        SignError::Core(e.into())
    }
}

impl SignError {
    /// Error object to send to the peer when this error rejects one of its
    /// messages.
    pub fn rpc_reason(&self) -> ErrorObject {
        let code = match self {
            Self::UnsupportedNamespace(e) => match e {
                UnsupportedNamespace::Chains { .. } => reasons::UNSUPPORTED_CHAINS,
                UnsupportedNamespace::Methods { .. } => reasons::UNSUPPORTED_METHODS,
                UnsupportedNamespace::Events { .. } => reasons::UNSUPPORTED_EVENTS,
                UnsupportedNamespace::Accounts { .. } => reasons::UNSUPPORTED_ACCOUNTS,
                UnsupportedNamespace::NamespaceKey { .. } => reasons::UNSUPPORTED_NAMESPACE_KEY,
            },
            Self::AutoNamespaces(e) => match e {
                AutoNamespacesError::RequiredChainsNotSatisfied { .. } => reasons::UNSUPPORTED_CHAINS,
                AutoNamespacesError::RequiredMethodsNotSatisfied { .. } => reasons::UNSUPPORTED_METHODS,
                AutoNamespacesError::RequiredEventsNotSatisfied { .. } => reasons::UNSUPPORTED_EVENTS,
                AutoNamespacesError::RequiredAccountsNotSatisfied { .. } => reasons::UNSUPPORTED_ACCOUNTS,
            },
            Self::Unauthorized(e) => match e {
                Unauthorized::Method { .. } => reasons::UNAUTHORIZED_METHOD,
                Unauthorized::Event { .. } => reasons::UNAUTHORIZED_EVENT,
                Unauthorized::Update => reasons::UNAUTHORIZED_UPDATE,
                Unauthorized::Extend => reasons::UNAUTHORIZED_EXTEND,
            },
            Self::EmptySessionProperties | Self::InvalidExpiry(_) => error_codes::INVALID_PARAMS,
            Self::ProposalNotFound(_)
            | Self::ProposalExpired(_)
            | Self::SessionNotFound(_)
            | Self::SessionExpired(_) => reasons::NO_SESSION_FOR_TOPIC,
            Self::Core(PairkitError::Rpc { code, message }) => {
                return ErrorObject::new(*code, message.clone())
            }
            Self::Core(PairkitError::Serialization(_)) => error_codes::INVALID_PARAMS,
            Self::Core(_) => error_codes::INTERNAL_ERROR,
        };
        ErrorObject::new(code, self.to_string())
    }
}
