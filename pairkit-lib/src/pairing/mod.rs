//! Pairing URIs and the pairing lifecycle.

mod engine;
mod types;
mod uri;

pub use engine::{PairingEngine, PAIRINGS_COLLECTION};
pub use types::{AppMetadata, Pairing, PairingState, RelayProtocolOptions};
pub use uri::{PairingUri, PAIRING_URI_VERSION};
