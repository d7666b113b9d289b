use serde::{Deserialize, Serialize};

use crate::Topic;

/// Descriptive metadata an application shares with its peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Relay protocol advertised in a pairing URI or proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self {
            protocol: "irn".to_string(),
            data: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    /// Created and shared, no peer activity yet.
    Proposed,
    Active,
    Expired,
}

/// A pairing record, one per topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: Topic,
    pub relay: RelayProtocolOptions,
    /// Unix seconds.
    pub expiry: i64,
    pub active: bool,
    #[serde(default)]
    pub peer_metadata: Option<AppMetadata>,
}

impl Pairing {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry <= now
    }

    pub fn state_at(&self, now: i64) -> PairingState {
        if self.is_expired_at(now) {
            PairingState::Expired
        } else if self.active {
            PairingState::Active
        } else {
            PairingState::Proposed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_with_time() {
        let mut pairing = Pairing {
            topic: Topic::from("t"),
            relay: RelayProtocolOptions::default(),
            expiry: 100,
            active: false,
            peer_metadata: None,
        };
        assert_eq!(pairing.state_at(99), PairingState::Proposed);
        pairing.active = true;
        assert_eq!(pairing.state_at(99), PairingState::Active);
        assert_eq!(pairing.state_at(100), PairingState::Expired);
    }
}
