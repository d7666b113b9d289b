use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Result, Topic};

/// Identifier the relay assigns to a subscription.
pub type SubscriptionId = String;

/// Connection state of the relay socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// A payload the relay delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: Topic,
    /// Base64 envelope as published by the peer.
    pub payload: String,
    /// Relay publish time (unix seconds), when the relay reports it.
    pub published_at: Option<i64>,
}

/// Publish/subscribe relay the client talks through.
///
/// Implementations wrap the actual socket. Errors are reported as
/// [`PairkitError::Networking`](crate::PairkitError::Networking), flagged
/// retryable when another attempt may succeed.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open the connection. Status changes are reported on
    /// [`status_events`](Self::status_events).
    async fn connect(&self) -> Result<()>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Publish a payload on a topic. `tag` identifies the message kind to the
    /// relay; `prompt` asks the relay to wake the receiver.
    async fn publish(&self, topic: &Topic, payload: &str, tag: u32, prompt: bool) -> Result<()>;

    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId>;

    /// Drop a subscription.
    async fn unsubscribe(&self, topic: &Topic) -> Result<()>;

    /// Current connection status.
    fn status(&self) -> ConnectionStatus;

    /// Stream of connection status transitions.
    fn status_events(&self) -> broadcast::Receiver<ConnectionStatus>;

    /// Stream of messages delivered on subscribed topics, in relay order per
    /// topic.
    fn inbound_messages(&self) -> broadcast::Receiver<InboundMessage>;
}
