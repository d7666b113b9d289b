//! Relay subscription manager.
//!
//! Tracks every topic the client listens on, persists that set so it survives
//! restarts, and replays it after each (re)connection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinSet;

use super::transport::{ConnectionStatus, RelayTransport, SubscriptionId};
use crate::errors::PairkitError;
use crate::storage::{KeyValueStore, TypedStore};
use crate::{Result, Topic};

/// Collection holding the persisted topic set.
pub const SUBSCRIPTIONS_COLLECTION: &str = "relay_subscriptions";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SubscriptionRecord {
    topic: Topic,
    created_at: i64,
}

/// Outcome of replaying subscriptions after a reconnect.
#[derive(Debug, Default)]
pub struct ResubscribeReport {
    /// Topics the relay accepted.
    pub subscribed: Vec<Topic>,
    /// Topics whose subscribe call failed, with the error.
    pub failed: Vec<(Topic, PairkitError)>,
}

impl ResubscribeReport {
    pub fn attempted(&self) -> usize {
        self.subscribed.len() + self.failed.len()
    }
}

/// Owns the set of subscribed topics and the view of the connection state.
pub struct RelaySubscriptionManager {
    transport: Arc<dyn RelayTransport>,
    records: TypedStore<SubscriptionRecord>,
    active: RwLock<HashMap<Topic, Option<SubscriptionId>>>,
    status: watch::Sender<ConnectionStatus>,
}

impl RelaySubscriptionManager {
    pub fn new(transport: Arc<dyn RelayTransport>, store: Arc<dyn KeyValueStore>) -> Self {
        let (status, _) = watch::channel(transport.status());
        Self {
            transport,
            records: TypedStore::new(store, SUBSCRIPTIONS_COLLECTION),
            active: RwLock::new(HashMap::new()),
            status,
        }
    }

    pub fn transport(&self) -> &Arc<dyn RelayTransport> {
        &self.transport
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch connection status changes as seen by this manager.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Register a topic and, when connected, subscribe to it on the relay.
    ///
    /// The topic is persisted before the relay call, so a failed call is
    /// retried by the next resubscription sweep.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        self.records
            .set(
                topic.as_str(),
                &SubscriptionRecord {
                    topic: topic.clone(),
                    created_at: Utc::now().timestamp(),
                },
            )
            .await?;
        self.active.write().await.entry(topic.clone()).or_insert(None);

        if !self.status().is_connected() {
            tracing::debug!("relay not connected, subscription deferred");
            return Ok(());
        }

        let id = self.transport.subscribe(topic).await?;
        self.active.write().await.insert(topic.clone(), Some(id));
        Ok(())
    }

    /// Forget a topic and, when connected, unsubscribe on the relay.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.records.delete(topic.as_str()).await?;
        let was_active = self.active.write().await.remove(topic).is_some();

        if was_active && self.status().is_connected() {
            self.transport.unsubscribe(topic).await?;
        }
        Ok(())
    }

    /// Publish through the transport. Failures surface as networking errors;
    /// retrying is left to the caller.
    pub async fn publish(&self, topic: &Topic, payload: &str, tag: u32, prompt: bool) -> Result<()> {
        self.transport
            .publish(topic, payload, tag, prompt)
            .await
            .map_err(|e| match e {
                PairkitError::Networking { .. } => e,
                other => PairkitError::networking(other.to_string()),
            })
    }

    pub async fn is_subscribed(&self, topic: &Topic) -> bool {
        self.active.read().await.contains_key(topic)
    }

    /// Topics currently tracked in memory.
    pub async fn subscribed_topics(&self) -> Vec<Topic> {
        self.active.read().await.keys().cloned().collect()
    }

    /// Re-issue a subscribe call for every known topic.
    ///
    /// The topic set is snapshotted from persistent storage (plus anything
    /// only held in memory) before the first call, and each topic is
    /// subscribed independently: one failure never prevents the others.
    pub async fn resubscribe_all(&self) -> Result<ResubscribeReport> {
        let mut snapshot: BTreeSet<Topic> = self
            .records
            .get_all()
            .await?
            .into_iter()
            .map(|record| record.topic)
            .collect();
        {
            let mut active = self.active.write().await;
            snapshot.extend(active.keys().cloned());
            for topic in &snapshot {
                active.entry(topic.clone()).or_insert(None);
            }
        }

        let mut tasks = JoinSet::new();
        for topic in snapshot {
            let transport = Arc::clone(&self.transport);
            tasks.spawn(async move {
                let result = transport.subscribe(&topic).await;
                (topic, result)
            });
        }

        let mut report = ResubscribeReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((topic, Ok(id))) => {
                    // Topics unsubscribed mid-sweep stay forgotten.
                    if let Some(slot) = self.active.write().await.get_mut(&topic) {
                        *slot = Some(id);
                    }
                    report.subscribed.push(topic);
                }
                Ok((topic, Err(e))) => {
                    tracing::warn!(topic = %topic, error = %e, "resubscribe failed");
                    report.failed.push((topic, e));
                }
                Err(e) => tracing::warn!(error = %e, "resubscribe task aborted"),
            }
        }

        tracing::debug!(
            subscribed = report.subscribed.len(),
            failed = report.failed.len(),
            "resubscription sweep finished"
        );
        Ok(report)
    }

    /// Record a status transition, replaying subscriptions on `Connected`.
    pub async fn handle_status(&self, status: ConnectionStatus) -> Option<ResubscribeReport> {
        self.status.send_replace(status);
        if !status.is_connected() {
            return None;
        }
        match self.resubscribe_all().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "could not read persisted topics");
                None
            }
        }
    }

    /// Consume the transport's status stream until it closes.
    pub async fn run_status_loop(self: Arc<Self>, mut events: broadcast::Receiver<ConnectionStatus>) {
        loop {
            match events.recv().await {
                Ok(status) => {
                    self.handle_status(status).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status events lagged, re-reading transport state");
                    let current = self.transport.status();
                    self.handle_status(current).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyValueStore;
    use crate::test_utils::MockRelayNetwork;

    fn topic(n: u8) -> Topic {
        Topic::new(format!("{:02x}", n).repeat(32))
    }

    #[tokio::test]
    async fn test_subscribe_deferred_until_connected() {
        let network = MockRelayNetwork::new();
        let transport = network.transport();
        let manager =
            RelaySubscriptionManager::new(transport.clone(), Arc::new(InMemoryKeyValueStore::new()));

        manager.subscribe(&topic(1)).await.unwrap();
        assert!(manager.is_subscribed(&topic(1)).await);
        assert!(transport.subscribe_calls().is_empty());

        transport.connect().await.unwrap();
        let report = manager.handle_status(ConnectionStatus::Connected).await.unwrap();
        assert_eq!(report.subscribed, vec![topic(1)]);
        assert_eq!(transport.subscribe_calls(), vec![topic(1)]);
    }

    #[tokio::test]
    async fn test_unsubscribe_forgets_topic() {
        let network = MockRelayNetwork::new();
        let transport = network.connected_transport().await;
        let store = Arc::new(InMemoryKeyValueStore::new());
        let manager = RelaySubscriptionManager::new(transport.clone(), store.clone());
        manager.handle_status(ConnectionStatus::Connected).await;

        manager.subscribe(&topic(2)).await.unwrap();
        assert!(transport.is_subscribed(&topic(2)));

        manager.unsubscribe(&topic(2)).await.unwrap();
        assert!(!transport.is_subscribed(&topic(2)));
        assert!(!manager.is_subscribed(&topic(2)).await);
        assert!(store.get_all(SUBSCRIPTIONS_COLLECTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failed_resubscribe_does_not_block_others() {
        let network = MockRelayNetwork::new();
        let transport = network.connected_transport().await;
        let manager =
            RelaySubscriptionManager::new(transport.clone(), Arc::new(InMemoryKeyValueStore::new()));
        manager.handle_status(ConnectionStatus::Connected).await;

        for n in 1..=3 {
            manager.subscribe(&topic(n)).await.unwrap();
        }
        transport.fail_subscribe_for(&topic(2));
        transport.clear_subscribe_calls();

        let report = manager.resubscribe_all().await.unwrap();
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, topic(2));

        let mut subscribed = report.subscribed.clone();
        subscribed.sort();
        assert_eq!(subscribed, vec![topic(1), topic(3)]);
    }

    #[tokio::test]
    async fn test_publish_failure_is_networking_error() {
        let network = MockRelayNetwork::new();
        let transport = network.transport();
        let manager =
            RelaySubscriptionManager::new(transport, Arc::new(InMemoryKeyValueStore::new()));

        let err = manager.publish(&topic(1), "payload", 1000, false).await.unwrap_err();
        assert!(matches!(err, PairkitError::Networking { .. }));
    }
}
