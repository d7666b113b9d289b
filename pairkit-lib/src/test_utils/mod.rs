//! Test utilities for pairkit.
//!
//! Provides an in-memory relay network that delivers published envelopes
//! between any number of clients, with knobs for simulating connection drops
//! and relay failures, plus a few fixtures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pairkit_lib::test_utils::MockRelayNetwork;
//!
//! let network = MockRelayNetwork::new();
//! let dapp_relay = network.connected_transport().await;
//! let wallet_relay = network.connected_transport().await;
//!
//! // Simulate a dropped socket and recovery
//! wallet_relay.drop_connection();
//! wallet_relay.connect().await?;
//! ```

mod fixtures;
mod mock_network;

pub use fixtures::{random_topic, test_metadata, topic_from_byte};
pub use mock_network::{MockRelayNetwork, MockRelayTransport, PublishedMessage};
