//! Configuration for the core protocol layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Relay-facing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay protocol advertised in pairing URIs.
    #[serde(default = "default_relay_protocol")]
    pub protocol: String,

    /// Optional relay protocol data advertised in pairing URIs.
    #[serde(default)]
    pub protocol_data: Option<String>,
}

fn default_relay_protocol() -> String {
    "irn".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            protocol: default_relay_protocol(),
            protocol_data: None,
        }
    }
}

/// Request/response correlation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Default time to wait for a response, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Publish attempts before a networking error is surfaced.
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// Upper bound on the delay between publish attempts, in milliseconds.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Capacity of each method handler's inbound queue.
    #[serde(default = "default_handler_queue")]
    pub handler_queue_capacity: usize,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_max_retry_delay() -> u64 {
    2_000
}

fn default_handler_queue() -> usize {
    64
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            publish_attempts: default_publish_attempts(),
            max_retry_delay_ms: default_max_retry_delay(),
            handler_queue_capacity: default_handler_queue(),
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the number of publish attempts. Values below 1 are treated as 1.
    pub fn with_publish_attempts(mut self, attempts: u32) -> Self {
        self.publish_attempts = attempts.max(1);
        self
    }

    /// Set the retry delay ceiling.
    pub fn with_max_retry_delay(mut self, millis: u64) -> Self {
        self.max_retry_delay_ms = millis;
        self
    }
}

/// Pairing lifetime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Lifetime of a pairing that has not been activated, in seconds.
    #[serde(default = "default_inactive_ttl")]
    pub inactive_ttl_secs: i64,

    /// Lifetime of an active pairing, in seconds.
    #[serde(default = "default_active_ttl")]
    pub active_ttl_secs: i64,
}

fn default_inactive_ttl() -> i64 {
    5 * 60
}

fn default_active_ttl() -> i64 {
    30 * 24 * 60 * 60
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            inactive_ttl_secs: default_inactive_ttl(),
            active_ttl_secs: default_active_ttl(),
        }
    }
}

/// Configuration shared by the core layers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
}

impl CoreConfig {
    /// Short timeouts and quick retries, for tests.
    pub fn fast() -> Self {
        Self {
            rpc: RpcConfig::default()
                .with_request_timeout(2)
                .with_publish_attempts(2)
                .with_max_retry_delay(10),
            ..Self::default()
        }
    }

    /// Parse from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.relay.protocol, "irn");
        assert_eq!(config.rpc.publish_attempts, 3);
        assert_eq!(config.pairing.inactive_ttl_secs, 300);
        assert_eq!(config.pairing.active_ttl_secs, 2_592_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoreConfig::from_json(r#"{"rpc": {"request_timeout_secs": 5}}"#).unwrap();
        assert_eq!(config.rpc.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.rpc.publish_attempts, 3);
        assert_eq!(config.relay, RelayConfig::default());
    }

    #[test]
    fn test_publish_attempts_floor() {
        let rpc = RpcConfig::default().with_publish_attempts(0);
        assert_eq!(rpc.publish_attempts, 1);
    }
}
