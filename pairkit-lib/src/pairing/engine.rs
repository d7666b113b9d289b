//! Pairing lifecycle.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::types::{AppMetadata, Pairing, RelayProtocolOptions};
use super::uri::PairingUri;
use crate::config::CoreConfig;
use crate::errors::PairkitError;
use crate::rpc::{ErrorObject, InboundRequest, NetworkingInteractor, ProtocolMethod, Scope};
use crate::storage::{KeyValueStore, TypedStore};
use crate::{Result, Topic};

pub const PAIRINGS_COLLECTION: &str = "pairings";

/// Reason sent with `wc_pairingDelete`.
const USER_DISCONNECTED: (i64, &str) = (6000, "User disconnected.");
const NO_MATCHING_KEY: (i64, &str) = (1302, "No matching key.");

/// Creates, activates and expires pairings, and answers pairing-scoped
/// pings and deletes.
pub struct PairingEngine {
    interactor: Arc<NetworkingInteractor>,
    pairings: TypedStore<Pairing>,
    config: CoreConfig,
    // Serializes read-modify-write of pairing records.
    write_lock: Mutex<()>,
}

impl PairingEngine {
    pub fn new(
        interactor: Arc<NetworkingInteractor>,
        store: Arc<dyn KeyValueStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            interactor,
            pairings: TypedStore::new(store, PAIRINGS_COLLECTION),
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn interactor(&self) -> &Arc<NetworkingInteractor> {
        &self.interactor
    }

    fn relay_options(&self) -> RelayProtocolOptions {
        RelayProtocolOptions {
            protocol: self.config.relay.protocol.clone(),
            data: self.config.relay.protocol_data.clone(),
        }
    }

    /// Start a new, inactive pairing and return the URI to share.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self) -> Result<PairingUri> {
        let (topic, key) = self.interactor.kms().create_symmetric_key().await?;
        let expiry = Utc::now().timestamp() + self.config.pairing.inactive_ttl_secs;
        let relay = self.relay_options();

        let pairing = Pairing {
            topic: topic.clone(),
            relay: relay.clone(),
            expiry,
            active: false,
            peer_metadata: None,
        };
        self.pairings.set(topic.as_str(), &pairing).await?;
        self.subscribe_or_discard(&topic).await?;

        tracing::debug!(topic = %topic, "pairing created");
        Ok(PairingUri::new(topic, key, relay).with_expiry(expiry))
    }

    /// Join the pairing described by `uri`.
    ///
    /// The pairing is active straight away: the joining side pairs in order
    /// to receive proposals on it. Pairing twice with the same URI returns
    /// the existing record.
    ///
    /// # Errors
    /// `InvalidUri` if the URI does not parse; `ExpiredPairing` if its
    /// `expiryTimestamp` has passed.
    #[tracing::instrument(skip(self, uri))]
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let uri = PairingUri::parse(uri)?;
        let now = Utc::now().timestamp();
        if uri.expiry_timestamp.is_some_and(|expiry| expiry <= now) {
            return Err(PairkitError::ExpiredPairing(uri.topic.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.pairings.get(uri.topic.as_str()).await? {
            if !existing.is_expired_at(now) {
                return Ok(existing);
            }
        }

        self.interactor
            .kms()
            .set_symmetric_key(&uri.sym_key, &uri.topic)
            .await?;
        let pairing = Pairing {
            topic: uri.topic.clone(),
            relay: uri.relay,
            expiry: now + self.config.pairing.active_ttl_secs,
            active: true,
            peer_metadata: None,
        };
        self.pairings.set(pairing.topic.as_str(), &pairing).await?;
        self.subscribe_or_discard(&pairing.topic).await?;

        tracing::debug!(topic = %pairing.topic, "paired");
        Ok(pairing)
    }

    /// Mark a pairing active and extend it to the active lifetime. Calling
    /// it on an active pairing returns the record unchanged.
    pub async fn activate(&self, topic: &Topic) -> Result<Pairing> {
        let _guard = self.write_lock.lock().await;
        let mut pairing = self.get_pairing(topic).await?;
        if pairing.active {
            return Ok(pairing);
        }
        pairing.active = true;
        pairing.expiry = Utc::now().timestamp() + self.config.pairing.active_ttl_secs;
        self.pairings.set(topic.as_str(), &pairing).await?;
        tracing::debug!(topic = %topic, "pairing activated");
        Ok(pairing)
    }

    pub async fn update_metadata(&self, topic: &Topic, metadata: AppMetadata) -> Result<Pairing> {
        let _guard = self.write_lock.lock().await;
        let mut pairing = self.get_pairing(topic).await?;
        pairing.peer_metadata = Some(metadata);
        self.pairings.set(topic.as_str(), &pairing).await?;
        Ok(pairing)
    }

    /// Look up a pairing. Expired pairings are removed on access.
    ///
    /// # Errors
    /// `NoPairing` if none is stored; `ExpiredPairing` if it just expired.
    pub async fn get_pairing(&self, topic: &Topic) -> Result<Pairing> {
        let pairing = self
            .pairings
            .get(topic.as_str())
            .await?
            .ok_or_else(|| PairkitError::NoPairing(topic.to_string()))?;
        if pairing.is_expired_at(Utc::now().timestamp()) {
            self.cleanup(topic).await?;
            return Err(PairkitError::ExpiredPairing(topic.to_string()));
        }
        Ok(pairing)
    }

    /// All live pairings; expired ones are removed on the way.
    pub async fn get_pairings(&self) -> Result<Vec<Pairing>> {
        self.sweep_expired().await?;
        self.pairings.get_all().await.map_err(Into::into)
    }

    /// Delete every expired pairing, returning their topics.
    pub async fn sweep_expired(&self) -> Result<Vec<Topic>> {
        let now = Utc::now().timestamp();
        let mut removed = Vec::new();
        for pairing in self.pairings.get_all().await? {
            if pairing.is_expired_at(now) {
                self.cleanup(&pairing.topic).await?;
                removed.push(pairing.topic);
            }
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "expired pairings removed");
        }
        Ok(removed)
    }

    /// Tear down a pairing. The peer is told with `wc_pairingDelete` on a
    /// best-effort basis.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        self.get_pairing(topic).await?;
        let (code, message) = USER_DISCONNECTED;
        if let Err(e) = self
            .interactor
            .notify(topic, ProtocolMethod::PairingDelete, json!({"code": code, "message": message}))
            .await
        {
            tracing::warn!(error = %e, "could not notify peer of pairing delete");
        }
        self.cleanup(topic).await
    }

    /// Check that the peer is listening on the pairing.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        self.get_pairing(topic).await?;
        self.interactor
            .request(topic, ProtocolMethod::PairingPing, json!({}))
            .await?;
        Ok(())
    }

    /// Claim a pairing-scoped method for a higher layer.
    pub fn register(&self, method: ProtocolMethod) -> Result<mpsc::Receiver<InboundRequest>> {
        if method.scope() != Scope::Pairing {
            return Err(PairkitError::Internal(format!(
                "{} is not a pairing method",
                method
            )));
        }
        self.interactor.register(method)
    }

    /// Subscribe to a freshly stored pairing, dropping its key and record
    /// if the relay refuses.
    async fn subscribe_or_discard(&self, topic: &Topic) -> Result<()> {
        if let Err(e) = self.interactor.subscribe(topic).await {
            if let Err(cleanup) = self.cleanup(topic).await {
                tracing::warn!(topic = %topic, error = %cleanup, "pairing cleanup failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn cleanup(&self, topic: &Topic) -> Result<()> {
        self.interactor.unsubscribe(topic).await?;
        self.interactor.kms().delete_symmetric_key(topic).await?;
        self.pairings.delete(topic.as_str()).await?;
        Ok(())
    }

    /// Register the ping and delete handlers and spawn their loops.
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let pings = self.interactor.register(ProtocolMethod::PairingPing)?;
        let deletes = self.interactor.register(ProtocolMethod::PairingDelete)?;
        Ok(vec![
            tokio::spawn(Arc::clone(self).handle_pings(pings)),
            tokio::spawn(Arc::clone(self).handle_deletes(deletes)),
        ])
    }

    async fn handle_pings(self: Arc<Self>, mut requests: mpsc::Receiver<InboundRequest>) {
        while let Some(inbound) = requests.recv().await {
            let result = match self.get_pairing(&inbound.topic).await {
                Ok(_) => {
                    self.interactor
                        .respond_success(&inbound.topic, ProtocolMethod::PairingPing, inbound.request.id, Value::Bool(true))
                        .await
                }
                Err(_) => {
                    let (code, message) = NO_MATCHING_KEY;
                    self.interactor
                        .respond_error(
                            &inbound.topic,
                            ProtocolMethod::PairingPing,
                            inbound.request.id,
                            ErrorObject::new(code, message),
                        )
                        .await
                }
            };
            if let Err(e) = result {
                tracing::warn!(topic = %inbound.topic, error = %e, "could not answer pairing ping");
            }
        }
    }

    async fn handle_deletes(self: Arc<Self>, mut requests: mpsc::Receiver<InboundRequest>) {
        while let Some(inbound) = requests.recv().await {
            // Only pairing topics may be torn down this way; session topics
            // share the method table but not the record.
            let is_pairing = matches!(self.pairings.get(inbound.topic.as_str()).await, Ok(Some(_)));
            if !is_pairing {
                tracing::warn!(topic = %inbound.topic, "pairing delete on a topic with no pairing");
                let (code, message) = NO_MATCHING_KEY;
                if let Err(e) = self
                    .interactor
                    .respond_error(
                        &inbound.topic,
                        ProtocolMethod::PairingDelete,
                        inbound.request.id,
                        ErrorObject::new(code, message),
                    )
                    .await
                {
                    tracing::debug!(error = %e, "could not refuse pairing delete");
                }
                continue;
            }

            // The reply has to go out while the key still exists.
            if let Err(e) = self
                .interactor
                .respond_success(&inbound.topic, ProtocolMethod::PairingDelete, inbound.request.id, Value::Bool(true))
                .await
            {
                tracing::debug!(error = %e, "could not acknowledge pairing delete");
            }
            match self.cleanup(&inbound.topic).await {
                Ok(()) => tracing::debug!(topic = %inbound.topic, "pairing deleted by peer"),
                Err(e) => tracing::warn!(topic = %inbound.topic, error = %e, "pairing cleanup failed"),
            }
        }
    }
}
