//! Relay transport abstraction and subscription bookkeeping.

mod subscriptions;
mod transport;

pub use subscriptions::{RelaySubscriptionManager, ResubscribeReport, SUBSCRIPTIONS_COLLECTION};
pub use transport::{ConnectionStatus, InboundMessage, RelayTransport, SubscriptionId};
