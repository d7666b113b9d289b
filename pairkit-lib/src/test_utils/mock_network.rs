//! In-memory relay network for end-to-end tests.
//!
//! Every published message is kept in a mailbox so a client that subscribes
//! after the publish still receives it, the way a real relay holds messages
//! for their TTL. Messages are never echoed back to their publisher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::relay::{ConnectionStatus, InboundMessage, RelayTransport, SubscriptionId};
use crate::{PairkitError, Result, Topic};

const CHANNEL_CAPACITY: usize = 1024;

/// A message as the relay received it.
#[derive(Clone, Debug)]
pub struct PublishedMessage {
    pub topic: Topic,
    pub payload: String,
    pub tag: u32,
    pub prompt: bool,
    /// Index of the publishing client.
    pub from: usize,
}

struct Stored {
    message: PublishedMessage,
    delivered_to: HashSet<usize>,
}

struct ClientState {
    id: usize,
    status: Mutex<ConnectionStatus>,
    subscriptions: Mutex<HashSet<Topic>>,
    subscribe_calls: Mutex<Vec<Topic>>,
    failing_subscriptions: Mutex<HashSet<Topic>>,
    failing_publishes: AtomicU32,
    status_tx: broadcast::Sender<ConnectionStatus>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

impl ClientState {
    fn deliver(&self, message: &PublishedMessage) {
        // No receivers is fine: the client may not be listening yet.
        let _ = self.inbound_tx.send(InboundMessage {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            published_at: Some(chrono::Utc::now().timestamp()),
        });
    }

    fn is_connected(&self) -> bool {
        self.status.lock().unwrap().is_connected()
    }
}

/// A simulated relay shared by several clients.
pub struct MockRelayNetwork {
    clients: Mutex<Vec<Arc<ClientState>>>,
    mailbox: Mutex<Vec<Stored>>,
    next_subscription: AtomicUsize,
}

impl MockRelayNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(Vec::new()),
            mailbox: Mutex::new(Vec::new()),
            next_subscription: AtomicUsize::new(1),
        })
    }

    /// Attach a new, disconnected client.
    pub fn transport(self: &Arc<Self>) -> Arc<MockRelayTransport> {
        let mut clients = self.clients.lock().unwrap();
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (inbound_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let state = Arc::new(ClientState {
            id: clients.len(),
            status: Mutex::new(ConnectionStatus::Disconnected),
            subscriptions: Mutex::new(HashSet::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            failing_subscriptions: Mutex::new(HashSet::new()),
            failing_publishes: AtomicU32::new(0),
            status_tx,
            inbound_tx,
        });
        clients.push(state.clone());
        Arc::new(MockRelayTransport {
            network: Arc::clone(self),
            state,
        })
    }

    /// Attach a new client that is already connected.
    pub async fn connected_transport(self: &Arc<Self>) -> Arc<MockRelayTransport> {
        let transport = self.transport();
        transport.set_status(ConnectionStatus::Connected);
        transport
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.mailbox
            .lock()
            .unwrap()
            .iter()
            .map(|stored| stored.message.clone())
            .collect()
    }

    fn publish(&self, message: PublishedMessage) {
        let clients = self.clients.lock().unwrap().clone();
        // Held while delivering so a concurrent subscribe sees the message
        // either live or in the mailbox.
        let mut mailbox = self.mailbox.lock().unwrap();
        let mut stored = Stored {
            message,
            delivered_to: HashSet::new(),
        };
        for client in clients {
            if client.id == stored.message.from || !client.is_connected() {
                continue;
            }
            if client
                .subscriptions
                .lock()
                .unwrap()
                .contains(&stored.message.topic)
            {
                client.deliver(&stored.message);
                stored.delivered_to.insert(client.id);
            }
        }
        mailbox.push(stored);
    }

    fn flush_mailbox(&self, client: &ClientState, topic: &Topic) {
        let mut mailbox = self.mailbox.lock().unwrap();
        for stored in mailbox.iter_mut() {
            if &stored.message.topic == topic
                && stored.message.from != client.id
                && !stored.delivered_to.contains(&client.id)
            {
                client.deliver(&stored.message);
                stored.delivered_to.insert(client.id);
            }
        }
    }
}

/// One client's connection to a [`MockRelayNetwork`].
pub struct MockRelayTransport {
    network: Arc<MockRelayNetwork>,
    state: Arc<ClientState>,
}

impl MockRelayTransport {
    /// Index of this client on the network.
    pub fn id(&self) -> usize {
        self.state.id
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.state.status.lock().unwrap() = status;
        let _ = self.state.status_tx.send(status);
    }

    /// Simulate the socket dropping: the relay forgets this client's
    /// subscriptions.
    pub fn drop_connection(&self) {
        self.state.subscriptions.lock().unwrap().clear();
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Topics passed to `subscribe`, in call order.
    pub fn subscribe_calls(&self) -> Vec<Topic> {
        self.state.subscribe_calls.lock().unwrap().clone()
    }

    pub fn clear_subscribe_calls(&self) {
        self.state.subscribe_calls.lock().unwrap().clear();
    }

    /// Whether the relay currently holds a subscription for this client.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.state.subscriptions.lock().unwrap().contains(topic)
    }

    /// Make every subscribe call for `topic` fail.
    pub fn fail_subscribe_for(&self, topic: &Topic) {
        self.state
            .failing_subscriptions
            .lock()
            .unwrap()
            .insert(topic.clone());
    }

    /// Make the next `count` publish calls fail with a retryable error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Deliver a raw payload to this client as if the relay received it.
    pub fn inject(&self, topic: &Topic, payload: &str) {
        self.state.deliver(&PublishedMessage {
            topic: topic.clone(),
            payload: payload.to_string(),
            tag: 0,
            prompt: false,
            from: usize::MAX,
        });
    }
}

#[async_trait]
impl RelayTransport for MockRelayTransport {
    async fn connect(&self) -> Result<()> {
        self.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_connection();
        Ok(())
    }

    async fn publish(&self, topic: &Topic, payload: &str, tag: u32, prompt: bool) -> Result<()> {
        if !self.state.is_connected() {
            return Err(PairkitError::networking("relay not connected"));
        }
        let failing = self.state.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_publishes
                .store(failing - 1, Ordering::SeqCst);
            return Err(PairkitError::networking("simulated publish failure"));
        }
        self.network.publish(PublishedMessage {
            topic: topic.clone(),
            payload: payload.to_string(),
            tag,
            prompt,
            from: self.state.id,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId> {
        self.state
            .subscribe_calls
            .lock()
            .unwrap()
            .push(topic.clone());
        if !self.state.is_connected() {
            return Err(PairkitError::networking("relay not connected"));
        }
        if self
            .state
            .failing_subscriptions
            .lock()
            .unwrap()
            .contains(topic)
        {
            return Err(PairkitError::networking("simulated subscribe failure"));
        }
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .insert(topic.clone());
        self.network.flush_mailbox(&self.state, topic);

        let n = self.network.next_subscription.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sub-{}-{}", self.state.id, n))
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.state.subscriptions.lock().unwrap().remove(topic);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        *self.state.status.lock().unwrap()
    }

    fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.state.status_tx.subscribe()
    }

    fn inbound_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.state.inbound_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::topic_from_byte;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let network = MockRelayNetwork::new();
        let alice = network.connected_transport().await;
        let bob = network.connected_transport().await;
        let carol = network.connected_transport().await;
        let topic = topic_from_byte(1);

        bob.subscribe(&topic).await.unwrap();
        let mut bob_rx = bob.inbound_messages();
        let mut carol_rx = carol.inbound_messages();
        let mut alice_rx = alice.inbound_messages();
        alice.subscribe(&topic).await.unwrap();

        alice.publish(&topic, "hello", 1000, false).await.unwrap();

        assert_eq!(bob_rx.recv().await.unwrap().payload, "hello");
        assert!(carol_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_mailbox() {
        let network = MockRelayNetwork::new();
        let alice = network.connected_transport().await;
        let bob = network.connected_transport().await;
        let topic = topic_from_byte(2);

        alice.publish(&topic, "early", 1000, false).await.unwrap();

        let mut bob_rx = bob.inbound_messages();
        bob.subscribe(&topic).await.unwrap();
        assert_eq!(bob_rx.recv().await.unwrap().payload, "early");

        // Resubscribing does not redeliver.
        bob.subscribe(&topic).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_knobs() {
        let network = MockRelayNetwork::new();
        let alice = network.connected_transport().await;
        let topic = topic_from_byte(3);

        alice.fail_next_publishes(1);
        assert!(alice.publish(&topic, "x", 1, false).await.is_err());
        assert!(alice.publish(&topic, "x", 1, false).await.is_ok());

        alice.drop_connection();
        assert_eq!(alice.status(), ConnectionStatus::Disconnected);
        assert!(alice.subscribe(&topic).await.is_err());
    }
}
