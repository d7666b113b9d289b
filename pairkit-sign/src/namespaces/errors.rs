use thiserror::Error;

/// A namespace map failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UnsupportedNamespace {
    #[error("unsupported chains for {key}: {detail}")]
    Chains { key: String, detail: String },

    #[error("method {method} not granted for {key}")]
    Methods { key: String, method: String },

    #[error("event {event} not granted for {key}")]
    Events { key: String, event: String },

    #[error("unsupported accounts for {key}: {detail}")]
    Accounts { key: String, detail: String },

    #[error("namespace {key} missing from session")]
    NamespaceKey { key: String },
}

/// A wallet's capabilities cannot satisfy a required namespace.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AutoNamespacesError {
    #[error("no supported chain for required namespace {key}")]
    RequiredChainsNotSatisfied { key: String },

    #[error("required methods {methods:?} of {key} are not supported")]
    RequiredMethodsNotSatisfied { key: String, methods: Vec<String> },

    #[error("required events {events:?} of {key} are not supported")]
    RequiredEventsNotSatisfied { key: String, events: Vec<String> },

    #[error("no account on the supported chains of {key}")]
    RequiredAccountsNotSatisfied { key: String },
}
