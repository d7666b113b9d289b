//! JSON-RPC 2.0 payloads exchanged inside envelopes.

use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PairkitError;
use crate::kms::PublicKey;
use crate::{Result, Topic};

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard error codes used in protocol responses.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Handler queue full.
    pub const HANDLER_BUSY: i64 = -32000;
}

/// JSON-RPC request id.
///
/// Generated as `unix_millis * 1000 + random(0..1000)`: roughly increasing,
/// and distinct for requests issued within the same millisecond.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcId(pub u64);

impl RpcId {
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let jitter: u64 = rand::thread_rng().gen_range(0..1000);
        Self(millis * 1000 + jitter)
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RpcId,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Deserialize the params into a typed struct.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(PairkitError::from)
    }
}

/// Error object carried in an error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ErrorObject> for PairkitError {
    fn from(err: ErrorObject) -> Self {
        PairkitError::rpc(err.code, err.message)
    }
}

/// Result or error half of a response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcOutcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: RpcId,
    pub jsonrpc: String,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            outcome: RpcOutcome::Result(result),
        }
    }

    pub fn error(id: RpcId, error: ErrorObject) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            outcome: RpcOutcome::Error(error),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            RpcOutcome::Result(value) => Ok(value),
            RpcOutcome::Error(error) => Err(error.into()),
        }
    }
}

/// Any payload found inside an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

#[derive(Deserialize)]
struct RawMessage {
    id: RpcId,
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl RpcMessage {
    /// Classify a decoded payload: anything with a method is a request, an
    /// `error` member makes an error response, everything else is a result.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawMessage = serde_json::from_value(value)?;
        let jsonrpc = raw
            .jsonrpc
            .unwrap_or_else(|| JSONRPC_VERSION.to_string());

        if let Some(method) = raw.method {
            return Ok(Self::Request(RpcRequest {
                id: raw.id,
                jsonrpc,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }));
        }

        let outcome = match raw.error {
            Some(error) => RpcOutcome::Error(error),
            None => RpcOutcome::Result(raw.result.unwrap_or(Value::Null)),
        };
        Ok(Self::Response(RpcResponse {
            id: raw.id,
            jsonrpc,
            outcome,
        }))
    }

    pub fn id(&self) -> RpcId {
        match self {
            Self::Request(request) => request.id,
            Self::Response(response) => response.id,
        }
    }
}

/// An inbound request handed to a registered handler.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub topic: Topic,
    pub request: RpcRequest,
    /// Sender key embedded in a type-1 envelope.
    pub sender_public_key: Option<PublicKey>,
    pub published_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_wire_shape() {
        let ok = serde_json::to_value(RpcResponse::success(RpcId(42), json!(true))).unwrap();
        assert_eq!(ok, json!({"id": 42, "jsonrpc": "2.0", "result": true}));

        let err = serde_json::to_value(RpcResponse::error(
            RpcId(42),
            ErrorObject::new(5000, "User rejected."),
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({"id": 42, "jsonrpc": "2.0", "error": {"code": 5000, "message": "User rejected."}})
        );
    }

    #[test]
    fn test_classify_messages() {
        let request = RpcMessage::from_value(json!({
            "id": 1, "jsonrpc": "2.0", "method": "wc_pairingPing", "params": {}
        }))
        .unwrap();
        assert!(matches!(request, RpcMessage::Request(ref r) if r.method == "wc_pairingPing"));

        let result = RpcMessage::from_value(json!({"id": 2, "jsonrpc": "2.0", "result": null})).unwrap();
        assert_eq!(
            result,
            RpcMessage::Response(RpcResponse::success(RpcId(2), Value::Null))
        );

        let error = RpcMessage::from_value(json!({
            "id": 3, "jsonrpc": "2.0", "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        match error {
            RpcMessage::Response(response) => {
                let err = response.into_result().unwrap_err();
                assert!(matches!(err, PairkitError::Rpc { code: -32601, .. }));
            }
            other => panic!("expected response, got {:?}", other),
        }

        assert!(RpcMessage::from_value(json!({"method": "no id"})).is_err());
    }

    #[test]
    fn test_generated_ids_are_large_and_vary() {
        let ids: std::collections::HashSet<RpcId> = (0..50).map(|_| RpcId::generate()).collect();
        assert!(ids.len() > 1);
        assert!(ids.iter().all(|id| id.0 > 1_000_000_000_000_000));
    }
}
