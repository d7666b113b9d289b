//! Session records and the params of session wire methods.

use pairkit_lib::kms::PublicKey;
use pairkit_lib::pairing::{AppMetadata, RelayProtocolOptions};
use pairkit_lib::rpc::{ErrorObject, RpcId};
use pairkit_lib::Topic;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::namespaces::{Blockchain, ProposalNamespaces, SessionNamespaces, SessionProperties};

/// One side of a session: its session key and what it says about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: PublicKey,
    pub metadata: AppMetadata,
}

/// `wc_sessionPropose` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: ProposalNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_namespaces: Option<ProposalNamespaces>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,
}

/// Result of an accepted `wc_sessionPropose`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResponse {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: PublicKey,
}

/// `wc_sessionSettle` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub controller: Participant,
    pub namespaces: SessionNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
    pub expiry: i64,
}

/// `wc_sessionUpdate` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: SessionNamespaces,
}

/// `wc_sessionExtend` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub method: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,
}

/// `wc_sessionRequest` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: RequestPayload,
    pub chain_id: Blockchain,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    pub data: Value,
}

/// `wc_sessionEvent` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub event: EventPayload,
    pub chain_id: Blockchain,
}

/// A proposal received on a pairing, waiting for approve or reject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionProposal {
    pub id: RpcId,
    pub pairing_topic: Topic,
    pub proposer: Participant,
    pub relays: Vec<RelayProtocolOptions>,
    pub required_namespaces: ProposalNamespaces,
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub session_properties: Option<SessionProperties>,
    /// Unix seconds.
    pub expiry: i64,
}

impl SessionProposal {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry <= now
    }
}

/// What a proposer remembers between the propose response and the
/// settlement, keyed by the session topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProposalContext {
    pub session_topic: Topic,
    pub pairing_topic: Topic,
    pub self_participant: Participant,
    pub peer_public_key: PublicKey,
    pub required_namespaces: ProposalNamespaces,
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub expiry: i64,
}

/// A settled session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub topic: Topic,
    pub pairing_topic: Topic,
    pub relay: RelayProtocolOptions,
    pub namespaces: SessionNamespaces,
    pub required_namespaces: ProposalNamespaces,
    pub optional_namespaces: Option<ProposalNamespaces>,
    pub session_properties: Option<SessionProperties>,
    /// Unix seconds.
    pub expiry: i64,
    pub self_participant: Participant,
    pub peer_participant: Participant,
    pub controller_public_key: PublicKey,
    /// Set once the proposer acknowledged the settlement.
    pub acknowledged: bool,
}

impl Session {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry <= now
    }

    pub fn is_controller(&self) -> bool {
        self.self_participant.public_key == self.controller_public_key
    }

    pub fn allows_method(&self, chain: &Blockchain, method: &str) -> bool {
        self.namespaces
            .values()
            .any(|ns| ns.covers_chain(chain) && ns.methods.iter().any(|m| m == method))
    }

    pub fn allows_event(&self, chain: &Blockchain, event: &str) -> bool {
        self.namespaces
            .values()
            .any(|ns| ns.covers_chain(chain) && ns.events.iter().any(|e| e == event))
    }
}

/// A request from the peer waiting for [`respond`](super::SessionEngine::respond).
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub topic: Topic,
    pub id: RpcId,
    pub chain_id: Blockchain,
    pub method: String,
    pub params: Value,
}

/// Something that happened to a proposal or session.
#[derive(Clone, Debug)]
pub enum SignEvent {
    SessionProposal(SessionProposal),
    SessionSettled(Session),
    SessionRejected { pairing_topic: Topic, reason: ErrorObject },
    SessionRequest(SessionRequest),
    SessionEvent { topic: Topic, chain_id: Blockchain, event: EventPayload },
    SessionUpdated { topic: Topic, namespaces: SessionNamespaces },
    SessionExtended { topic: Topic, expiry: i64 },
    SessionDeleted { topic: Topic, reason: ErrorObject },
    SessionExpired { topic: Topic },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_propose_params_wire_shape() {
        let params: SessionProposeParams = serde_json::from_value(json!({
            "relays": [{"protocol": "irn"}],
            "proposer": {
                "publicKey": "11".repeat(32),
                "metadata": {"name": "dapp", "description": "", "url": "https://d.example", "icons": []}
            },
            "requiredNamespaces": {
                "eip155": {"chains": ["eip155:1"], "methods": ["eth_sign"], "events": []}
            }
        }))
        .unwrap();
        assert_eq!(params.relays[0].protocol, "irn");
        assert!(params.optional_namespaces.is_none());
        assert_eq!(params.required_namespaces["eip155"].methods, vec!["eth_sign"]);

        let encoded = serde_json::to_value(&params).unwrap();
        assert!(encoded.get("sessionProperties").is_none());
        assert_eq!(encoded["proposer"]["publicKey"], json!("11".repeat(32)));
    }

    #[test]
    fn test_request_params_wire_shape() {
        let params = SessionRequestParams {
            request: RequestPayload {
                method: "eth_sign".into(),
                params: json!(["0xabc", "0xdead"]),
                expiry_timestamp: None,
            },
            chain_id: "eip155:1".parse().unwrap(),
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"request": {"method": "eth_sign", "params": ["0xabc", "0xdead"]}, "chainId": "eip155:1"})
        );
    }
}
