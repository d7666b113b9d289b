//! Protocol method table.

use std::fmt;
use std::str::FromStr;

use crate::errors::PairkitError;

/// Which channel a method travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Pairing,
    Session,
}

/// Wire methods, with the relay tags and prompt flag each one uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolMethod {
    PairingDelete,
    PairingPing,
    SessionPropose,
    SessionSettle,
    SessionUpdate,
    SessionExtend,
    SessionRequest,
    SessionEvent,
    SessionDelete,
    SessionPing,
}

impl ProtocolMethod {
    pub const ALL: [ProtocolMethod; 10] = [
        Self::PairingDelete,
        Self::PairingPing,
        Self::SessionPropose,
        Self::SessionSettle,
        Self::SessionUpdate,
        Self::SessionExtend,
        Self::SessionRequest,
        Self::SessionEvent,
        Self::SessionDelete,
        Self::SessionPing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PairingDelete => "wc_pairingDelete",
            Self::PairingPing => "wc_pairingPing",
            Self::SessionPropose => "wc_sessionPropose",
            Self::SessionSettle => "wc_sessionSettle",
            Self::SessionUpdate => "wc_sessionUpdate",
            Self::SessionExtend => "wc_sessionExtend",
            Self::SessionRequest => "wc_sessionRequest",
            Self::SessionEvent => "wc_sessionEvent",
            Self::SessionDelete => "wc_sessionDelete",
            Self::SessionPing => "wc_sessionPing",
        }
    }

    /// Proposals travel on the pairing topic, so they are pairing-scoped.
    pub fn scope(&self) -> Scope {
        match self {
            Self::PairingDelete | Self::PairingPing | Self::SessionPropose => Scope::Pairing,
            _ => Scope::Session,
        }
    }

    pub fn request_tag(&self) -> u32 {
        match self {
            Self::PairingDelete => 1000,
            Self::PairingPing => 1002,
            Self::SessionPropose => 1100,
            Self::SessionSettle => 1102,
            Self::SessionUpdate => 1104,
            Self::SessionExtend => 1106,
            Self::SessionRequest => 1108,
            Self::SessionEvent => 1110,
            Self::SessionDelete => 1112,
            Self::SessionPing => 1114,
        }
    }

    pub fn response_tag(&self) -> u32 {
        self.request_tag() + 1
    }

    /// Whether the relay should wake the receiver for this request.
    pub fn prompt(&self) -> bool {
        matches!(self, Self::SessionPropose | Self::SessionRequest)
    }
}

impl fmt::Display for ProtocolMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolMethod {
    type Err = PairkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| PairkitError::rpc(super::error_codes::METHOD_NOT_FOUND, format!("unknown method {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for method in ProtocolMethod::ALL {
            assert_eq!(method.as_str().parse::<ProtocolMethod>().unwrap(), method);
        }
        assert!("eth_sign".parse::<ProtocolMethod>().is_err());
    }

    #[test]
    fn test_tags_and_scopes() {
        assert_eq!(ProtocolMethod::SessionPropose.request_tag(), 1100);
        assert_eq!(ProtocolMethod::SessionPropose.response_tag(), 1101);
        assert_eq!(ProtocolMethod::SessionPropose.scope(), Scope::Pairing);
        assert_eq!(ProtocolMethod::SessionSettle.scope(), Scope::Session);
        assert!(ProtocolMethod::SessionRequest.prompt());
        assert!(!ProtocolMethod::SessionPing.prompt());
    }
}
