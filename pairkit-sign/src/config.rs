//! Client configuration.

use std::time::Duration;

use pairkit_lib::config::CoreConfig;
use pairkit_lib::pairing::AppMetadata;
use serde::{Deserialize, Serialize};

fn default_session_ttl() -> i64 {
    7 * 24 * 60 * 60
}

fn default_proposal_ttl() -> i64 {
    5 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

/// Settings for a [`SignClient`](crate::SignClient).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignConfig {
    #[serde(default)]
    pub core: CoreConfig,

    /// Metadata sent to peers in proposals and settlements.
    #[serde(default)]
    pub metadata: AppMetadata,

    /// Lifetime of a settled session, and the furthest an extend may push
    /// its expiry, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,

    /// How long a proposal waits for an answer, in seconds.
    #[serde(default = "default_proposal_ttl")]
    pub proposal_ttl_secs: i64,

    /// Period of the background expiry sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            metadata: AppMetadata::default(),
            session_ttl_secs: default_session_ttl(),
            proposal_ttl_secs: default_proposal_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl SignConfig {
    /// Short timeouts for tests.
    pub fn fast() -> Self {
        Self {
            core: CoreConfig::fast(),
            proposal_ttl_secs: 5,
            sweep_interval_secs: 1,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: AppMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| pairkit_lib::PairkitError::from(e).into())
    }

    pub fn proposal_ttl(&self) -> Duration {
        Duration::from_secs(self.proposal_ttl_secs.max(0) as u64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
