//! Error types for pairkit core operations.
//!
//! Every failure surfaced by the key manager, envelope codec, relay plumbing,
//! request correlation and pairing layers is a [`PairkitError`]. Each variant
//! maps to a stable numeric [`PairkitErrorCode`] so callers can branch on the
//! cause without matching on message text.

use std::fmt;

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PairkitErrorCode {
    /// No secret stored for a topic or public key
    KeyNotFound = 1000,
    /// Key material had the wrong shape
    InvalidKey = 1001,
    /// Envelope failed authentication or was malformed
    DecryptionFailed = 1100,
    /// Relay transport failure
    Networking = 2000,
    /// Request timed out before a response arrived
    RequestTimeout = 2001,
    /// Peer answered with a JSON-RPC error object
    Rpc = 2100,
    /// A handler is already registered for a method
    DuplicateHandler = 2101,
    /// Pairing URI could not be parsed
    InvalidUri = 3000,
    /// No pairing stored for a topic
    NoPairing = 3001,
    /// Pairing exists but has expired
    ExpiredPairing = 3002,
    /// Serialization error
    Serialization = 5002,
    /// Storage error
    Storage = 7000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Error type for pairkit core operations.
#[derive(Debug)]
pub enum PairkitError {
    /// No secret is stored under the given storage identifier.
    KeyNotFound(String),

    /// Key material could not be decoded.
    InvalidKey(String),

    /// An envelope failed authentication, had an invalid length, or used an
    /// unknown type byte.
    DecryptionFailed(String),

    /// The relay transport reported a failure.
    Networking {
        /// Transport error message
        message: String,
        /// Whether another attempt may succeed
        retryable: bool,
    },

    /// No response arrived before the deadline.
    RequestTimeout {
        /// Method that timed out
        method: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// The peer answered with an error object.
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Peer-supplied message
        message: String,
    },

    /// A handler is already registered for this scope and method.
    DuplicateHandler(String),

    /// Pairing URI is malformed.
    InvalidUri(String),

    /// No pairing is stored for the topic.
    NoPairing(String),

    /// The pairing expired and has been removed.
    ExpiredPairing(String),

    /// Serialization/deserialization error.
    Serialization(String),

    /// Storage operation failed.
    Storage(String),

    /// Internal/unexpected error.
    Internal(String),
}

impl PairkitError {
    /// Get the error code.
    pub fn code(&self) -> PairkitErrorCode {
        match self {
            Self::KeyNotFound(_) => PairkitErrorCode::KeyNotFound,
            Self::InvalidKey(_) => PairkitErrorCode::InvalidKey,
            Self::DecryptionFailed(_) => PairkitErrorCode::DecryptionFailed,
            Self::Networking { .. } => PairkitErrorCode::Networking,
            Self::RequestTimeout { .. } => PairkitErrorCode::RequestTimeout,
            Self::Rpc { .. } => PairkitErrorCode::Rpc,
            Self::DuplicateHandler(_) => PairkitErrorCode::DuplicateHandler,
            Self::InvalidUri(_) => PairkitErrorCode::InvalidUri,
            Self::NoPairing(_) => PairkitErrorCode::NoPairing,
            Self::ExpiredPairing(_) => PairkitErrorCode::ExpiredPairing,
            Self::Serialization(_) => PairkitErrorCode::Serialization,
            Self::Storage(_) => PairkitErrorCode::Storage,
            Self::Internal(_) => PairkitErrorCode::Internal,
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Networking { retryable, .. } => *retryable,
            Self::Storage(_) => true,
            _ => false,
        }
    }

    /// Returns a suggested retry delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Networking {
                retryable: true, ..
            } => Some(1000),
            Self::Storage(_) => Some(500),
            _ => None,
        }
    }

    /// Create a retryable networking error.
    pub fn networking(message: impl Into<String>) -> Self {
        Self::Networking {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a networking error that should not be retried.
    pub fn networking_fatal(message: impl Into<String>) -> Self {
        Self::Networking {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create an error from a peer-reported JSON-RPC error object.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Create a decryption error.
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::DecryptionFailed(reason.into())
    }
}

impl fmt::Display for PairkitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound(id) => write!(f, "no key stored for {}", id),
            Self::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            Self::DecryptionFailed(msg) => write!(f, "decryption failed: {}", msg),
            Self::Networking { message, .. } => write!(f, "networking error: {}", message),
            Self::RequestTimeout { method, timeout_ms } => {
                write!(f, "{} timed out after {}ms", method, timeout_ms)
            }
            Self::Rpc { code, message } => write!(f, "peer error {}: {}", code, message),
            Self::DuplicateHandler(method) => {
                write!(f, "a handler is already registered for {}", method)
            }
            Self::InvalidUri(msg) => write!(f, "invalid pairing uri: {}", msg),
            Self::NoPairing(topic) => write!(f, "no pairing for topic {}", topic),
            Self::ExpiredPairing(topic) => write!(f, "pairing {} has expired", topic),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for PairkitError {}

impl From<serde_json::Error> for PairkitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = PairkitError::networking("socket closed");
        assert_eq!(err.code(), PairkitErrorCode::Networking);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(1000));

        let err = PairkitError::networking_fatal("relay rejected payload");
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after_ms(), None);
    }

    #[test]
    fn test_error_display() {
        let err = PairkitError::rpc(5000, "User rejected.");
        assert_eq!(err.code(), PairkitErrorCode::Rpc);
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("User rejected."));

        let err = PairkitError::RequestTimeout {
            method: "wc_sessionPropose".to_string(),
            timeout_ms: 300_000,
        };
        assert!(err.to_string().contains("wc_sessionPropose"));
    }

    #[test]
    fn test_timeouts_and_decryption_are_not_retryable() {
        let err = PairkitError::RequestTimeout {
            method: "wc_pairingPing".to_string(),
            timeout_ms: 10,
        };
        assert!(!err.is_retryable());
        assert!(!PairkitError::decryption("bad tag").is_retryable());
    }
}
