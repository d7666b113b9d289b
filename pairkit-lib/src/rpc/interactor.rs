//! Request/response correlation over the relay.
//!
//! [`NetworkingInteractor`] seals outbound JSON-RPC payloads, publishes them
//! with bounded retry, and matches inbound responses to the pending request
//! with the same id on the same topic. Inbound requests are handed to the
//! handler registered for their method.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::methods::ProtocolMethod;
use super::registry::{DispatchError, MethodRegistry};
use super::types::{error_codes, ErrorObject, InboundRequest, RpcId, RpcMessage, RpcRequest, RpcResponse};
use crate::config::RpcConfig;
use crate::envelope::{EnvelopeKind, EnvelopeSerializer};
use crate::errors::PairkitError;
use crate::kms::KeyManagementService;
use crate::relay::{InboundMessage, RelaySubscriptionManager};
use crate::{Result, Topic};

/// Relay tag for error replies to requests whose method we do not know.
const UNKNOWN_METHOD_RESPONSE_TAG: u32 = 0;

struct PendingRequest {
    topic: Topic,
    method: ProtocolMethod,
    created_at: i64,
    timeout_at: i64,
    responder: oneshot::Sender<Result<Value>>,
}

/// Read-only view of an outstanding request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequestInfo {
    pub id: RpcId,
    pub topic: Topic,
    pub method: ProtocolMethod,
    pub created_at: i64,
    pub timeout_at: i64,
}

/// Per-request overrides.
#[derive(Clone, Copy, Debug)]
pub struct RequestOptions {
    /// Falls back to [`RpcConfig::request_timeout`].
    pub timeout: Option<Duration>,
    pub envelope: EnvelopeKind,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            envelope: EnvelopeKind::Symmetric,
        }
    }
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeKind) -> Self {
        self.envelope = envelope;
        self
    }
}

type PendingTable = Mutex<HashMap<RpcId, PendingRequest>>;

// Removes the entry when the awaiting future goes away, including on
// cancellation. A no-op once a response or the timeout path took it.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: RpcId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct NetworkingInteractor {
    kms: Arc<KeyManagementService>,
    serializer: EnvelopeSerializer,
    relay: Arc<RelaySubscriptionManager>,
    registry: MethodRegistry,
    pending: PendingTable,
    config: RpcConfig,
}

impl NetworkingInteractor {
    pub fn new(
        kms: Arc<KeyManagementService>,
        relay: Arc<RelaySubscriptionManager>,
        config: RpcConfig,
    ) -> Self {
        Self {
            serializer: EnvelopeSerializer::new(Arc::clone(&kms)),
            registry: MethodRegistry::new(config.handler_queue_capacity),
            kms,
            relay,
            pending: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn kms(&self) -> &Arc<KeyManagementService> {
        &self.kms
    }

    pub fn relay(&self) -> &Arc<RelaySubscriptionManager> {
        &self.relay
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        self.relay.subscribe(topic).await
    }

    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        self.relay.unsubscribe(topic).await
    }

    /// Claim inbound requests for `method`. See [`MethodRegistry::register`].
    pub fn register(&self, method: ProtocolMethod) -> Result<mpsc::Receiver<InboundRequest>> {
        self.registry.register(method)
    }

    pub fn unregister(&self, method: ProtocolMethod) -> bool {
        self.registry.unregister(method)
    }

    /// Snapshot of the outstanding requests, oldest first.
    pub fn pending_requests(&self) -> Vec<PendingRequestInfo> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<_> = pending
            .iter()
            .map(|(id, entry)| PendingRequestInfo {
                id: *id,
                topic: entry.topic.clone(),
                method: entry.method,
                created_at: entry.created_at,
                timeout_at: entry.timeout_at,
            })
            .collect();
        infos.sort_by_key(|info| (info.created_at, info.id));
        infos
    }

    /// Send a request and wait for its response with default options.
    pub async fn request(&self, topic: &Topic, method: ProtocolMethod, params: Value) -> Result<Value> {
        self.request_with(topic, method, params, RequestOptions::default())
            .await
    }

    /// Send a request and deserialize the result.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        params: Value,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request_with(topic, method, params, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request and wait for the response with the same id on the same
    /// topic.
    ///
    /// # Errors
    /// - `Networking` when every publish attempt failed
    /// - `RequestTimeout` when no response arrived in time
    /// - `Rpc` when the peer answered with an error object
    #[tracing::instrument(skip(self, topic, method, params, options), fields(topic = %topic, method = %method))]
    pub async fn request_with(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.request_timeout());
        let (tx, mut rx) = oneshot::channel();
        let id = self.insert_pending(topic, method, timeout, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let request = RpcRequest::new(id, method.as_str(), params);
        let payload = self
            .serializer
            .serialize(topic, &request, options.envelope)
            .await?;
        self.publish_with_retry(topic, &payload, method.request_tag(), method.prompt())
            .await?;
        tracing::debug!(id = %id, "request published");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PairkitError::Internal(format!(
                "responder for request {} dropped",
                id
            ))),
            Err(_) => {
                let removed = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                // Already taken: a response won the race against the timer.
                if removed.is_none() {
                    if let Ok(result) = rx.try_recv() {
                        return result;
                    }
                }
                tracing::debug!(id = %id, "request timed out");
                Err(PairkitError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Publish a request without waiting for, or tracking, its response.
    pub async fn notify(&self, topic: &Topic, method: ProtocolMethod, params: Value) -> Result<()> {
        self.notify_sealed(topic, method, params, EnvelopeKind::Symmetric)
            .await
    }

    /// [`notify`](Self::notify) with an explicit envelope kind.
    pub async fn notify_sealed(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        params: Value,
        envelope: EnvelopeKind,
    ) -> Result<()> {
        let request = RpcRequest::new(RpcId::generate(), method.as_str(), params);
        let payload = self.serializer.serialize(topic, &request, envelope).await?;
        self.publish_with_retry(topic, &payload, method.request_tag(), method.prompt())
            .await
    }

    fn insert_pending(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        timeout: Duration,
        responder: oneshot::Sender<Result<Value>>,
    ) -> RpcId {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut id = RpcId::generate();
        while pending.contains_key(&id) {
            id = RpcId::generate();
        }
        let now = Utc::now().timestamp_millis();
        pending.insert(
            id,
            PendingRequest {
                topic: topic.clone(),
                method,
                created_at: now,
                timeout_at: now + timeout.as_millis() as i64,
                responder,
            },
        );
        id
    }

    /// Reply to a request with a result.
    pub async fn respond_success(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        id: RpcId,
        result: Value,
    ) -> Result<()> {
        self.respond(topic, method.response_tag(), RpcResponse::success(id, result), EnvelopeKind::Symmetric)
            .await
    }

    /// Reply to a request with an error object.
    pub async fn respond_error(
        &self,
        topic: &Topic,
        method: ProtocolMethod,
        id: RpcId,
        error: ErrorObject,
    ) -> Result<()> {
        self.respond(topic, method.response_tag(), RpcResponse::error(id, error), EnvelopeKind::Symmetric)
            .await
    }

    /// Seal and publish an arbitrary response.
    pub async fn respond(
        &self,
        topic: &Topic,
        tag: u32,
        response: RpcResponse,
        envelope: EnvelopeKind,
    ) -> Result<()> {
        let payload = self.serializer.serialize(topic, &response, envelope).await?;
        self.publish_with_retry(topic, &payload, tag, false).await
    }

    async fn publish_with_retry(&self, topic: &Topic, payload: &str, tag: u32, prompt: bool) -> Result<()> {
        let attempts = self.config.publish_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.relay.publish(topic, payload, tag, prompt).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = Duration::from_millis(e.retry_after_ms().unwrap_or(0))
                        .min(self.config.max_retry_delay());
                    tracing::debug!(attempt, error = %e, "publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, attempt, error = %e, "publish failed");
                    return Err(e);
                }
            }
        }
    }

    /// Resolve the pending request `id` if it was sent on `topic`.
    ///
    /// Returns false when there is no such request; an entry sent on a
    /// different topic is left untouched.
    fn resolve(&self, topic: &Topic, id: RpcId, result: Result<Value>) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(&id) {
                Some(entry) if &entry.topic == topic => pending.remove(&id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                // The requester may have been cancelled in between.
                let _ = entry.responder.send(result);
                true
            }
            None => false,
        }
    }

    /// Decode one relay message and route it.
    pub async fn handle_inbound(&self, message: InboundMessage) {
        let decoded = self
            .serializer
            .deserialize::<Value>(&message.topic, &message.payload)
            .await;
        let (value, sender_public_key) = match decoded {
            Ok(decoded) => decoded,
            Err(PairkitError::KeyNotFound(_)) => {
                tracing::debug!(topic = %message.topic, "no key for topic, message dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "undecodable message dropped");
                return;
            }
        };
        let rpc = match RpcMessage::from_value(value) {
            Ok(rpc) => rpc,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "malformed payload dropped");
                return;
            }
        };

        match rpc {
            RpcMessage::Response(response) => {
                let id = response.id;
                if !self.resolve(&message.topic, id, response.into_result()) {
                    tracing::debug!(topic = %message.topic, id = %id, "unmatched response dropped");
                }
            }
            RpcMessage::Request(request) => {
                self.dispatch(InboundRequest {
                    topic: message.topic,
                    request,
                    sender_public_key,
                    published_at: message.published_at,
                })
                .await;
            }
        }
    }

    async fn dispatch(&self, inbound: InboundRequest) {
        let topic = inbound.topic.clone();
        let id = inbound.request.id;
        let method = match inbound.request.method.parse::<ProtocolMethod>() {
            Ok(method) => method,
            Err(_) => {
                tracing::debug!(method = %inbound.request.method, "unknown method");
                let response = RpcResponse::error(
                    id,
                    ErrorObject::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                );
                if let Err(e) = self
                    .respond(&topic, UNKNOWN_METHOD_RESPONSE_TAG, response, EnvelopeKind::Symmetric)
                    .await
                {
                    tracing::warn!(error = %e, "could not reject unknown method");
                }
                return;
            }
        };

        let error = match self.registry.dispatch(method, inbound) {
            Ok(()) => return,
            Err(DispatchError::NoHandler) => {
                tracing::debug!(method = %method, "no handler registered");
                ErrorObject::new(error_codes::METHOD_NOT_FOUND, "Method not found")
            }
            Err(DispatchError::Busy) => {
                tracing::warn!(method = %method, "handler queue full");
                ErrorObject::new(error_codes::HANDLER_BUSY, "Handler busy")
            }
        };
        if let Err(e) = self.respond_error(&topic, method, id, error).await {
            tracing::warn!(method = %method, error = %e, "could not reply to undelivered request");
        }
    }

    /// Consume inbound relay messages until the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: broadcast::Receiver<InboundMessage>) {
        loop {
            match inbound.recv().await {
                Ok(message) => self.handle_inbound(message).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "inbound messages lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("inbound loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::SymmetricKey;
    use crate::relay::{ConnectionStatus, RelayTransport};
    use crate::secure_storage::InMemoryKeyStorage;
    use crate::storage::InMemoryKeyValueStore;
    use crate::test_utils::{MockRelayNetwork, MockRelayTransport};
    use serde_json::json;

    struct Peer {
        interactor: Arc<NetworkingInteractor>,
        transport: Arc<MockRelayTransport>,
    }

    async fn peer(network: &Arc<MockRelayNetwork>, topic: &Topic, key: &SymmetricKey) -> Peer {
        let transport = network.connected_transport().await;
        let kms = Arc::new(KeyManagementService::new(Arc::new(InMemoryKeyStorage::new())));
        kms.set_symmetric_key(key, topic).await.unwrap();
        let relay = Arc::new(RelaySubscriptionManager::new(
            transport.clone(),
            Arc::new(InMemoryKeyValueStore::new()),
        ));
        relay.handle_status(ConnectionStatus::Connected).await;
        let config = RpcConfig::default()
            .with_request_timeout(2)
            .with_max_retry_delay(5);
        let interactor = Arc::new(NetworkingInteractor::new(kms, relay, config));
        tokio::spawn(Arc::clone(&interactor).run(transport.inbound_messages()));
        interactor.subscribe(topic).await.unwrap();
        Peer {
            interactor,
            transport,
        }
    }

    async fn pair_of_peers() -> (Arc<MockRelayNetwork>, Topic, Peer, Peer) {
        let network = MockRelayNetwork::new();
        let key = SymmetricKey::generate();
        let topic = crate::envelope::derive_topic(&key);
        let a = peer(&network, &topic, &key).await;
        let b = peer(&network, &topic, &key).await;
        (network, topic, a, b)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (_network, topic, a, b) = pair_of_peers().await;
        let mut handler = b.interactor.register(ProtocolMethod::SessionPing).unwrap();
        let responder = Arc::clone(&b.interactor);
        tokio::spawn(async move {
            let inbound = handler.recv().await.unwrap();
            responder
                .respond_success(&inbound.topic, ProtocolMethod::SessionPing, inbound.request.id, json!(true))
                .await
                .unwrap();
        });

        let result = a
            .interactor
            .request(&topic, ProtocolMethod::SessionPing, json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!(true));
        assert!(a.interactor.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_peer_error_surfaces_as_rpc_error() {
        let (_network, topic, a, b) = pair_of_peers().await;
        let mut handler = b.interactor.register(ProtocolMethod::SessionRequest).unwrap();
        let responder = Arc::clone(&b.interactor);
        tokio::spawn(async move {
            let inbound = handler.recv().await.unwrap();
            responder
                .respond_error(
                    &inbound.topic,
                    ProtocolMethod::SessionRequest,
                    inbound.request.id,
                    ErrorObject::new(5000, "User rejected."),
                )
                .await
                .unwrap();
        });

        let err = a
            .interactor
            .request(&topic, ProtocolMethod::SessionRequest, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PairkitError::Rpc { code: 5000, ref message } if message == "User rejected."));
    }

    #[tokio::test]
    async fn test_unhandled_method_answers_method_not_found() {
        let (_network, topic, a, _b) = pair_of_peers().await;
        let err = a
            .interactor
            .request(&topic, ProtocolMethod::SessionEvent, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PairkitError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (_network, topic, a, b) = pair_of_peers().await;
        // Registered but never answered.
        let _handler = b.interactor.register(ProtocolMethod::SessionPing).unwrap();

        let options = RequestOptions::default().with_timeout(Duration::from_millis(50));
        let err = a
            .interactor
            .request_with(&topic, ProtocolMethod::SessionPing, json!({}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, PairkitError::RequestTimeout { timeout_ms: 50, .. }));
        assert!(a.interactor.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_response_on_other_topic_is_ignored() {
        let (_network, topic, a, _b) = pair_of_peers().await;
        let other = Topic::new("ff".repeat(32));
        let (tx, mut rx) = oneshot::channel();
        let id = a
            .interactor
            .insert_pending(&topic, ProtocolMethod::SessionPing, Duration::from_secs(5), tx);

        assert!(!a.interactor.resolve(&other, id, Ok(json!(true))));
        assert_eq!(a.interactor.pending_requests().len(), 1);
        assert!(rx.try_recv().is_err());

        assert!(a.interactor.resolve(&topic, id, Ok(json!(true))));
        assert!(!a.interactor.resolve(&topic, id, Ok(json!(false))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_publish_retry_exhaustion() {
        let (_network, topic, a, _b) = pair_of_peers().await;
        a.transport.fail_next_publishes(10);

        let err = a
            .interactor
            .request(&topic, ProtocolMethod::SessionPing, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PairkitError::Networking { .. }));
        assert!(a.interactor.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_publish_retry_recovers() {
        let (_network, topic, a, b) = pair_of_peers().await;
        let mut handler = b.interactor.register(ProtocolMethod::PairingPing).unwrap();
        let responder = Arc::clone(&b.interactor);
        tokio::spawn(async move {
            let inbound = handler.recv().await.unwrap();
            responder
                .respond_success(&inbound.topic, ProtocolMethod::PairingPing, inbound.request.id, json!(true))
                .await
                .unwrap();
        });
        a.transport.fail_next_publishes(2);

        let result = a
            .interactor
            .request(&topic, ProtocolMethod::PairingPing, json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn test_garbage_is_dropped_without_disturbing_pending() {
        let (_network, topic, a, _b) = pair_of_peers().await;
        let (tx, _rx) = oneshot::channel();
        a.interactor
            .insert_pending(&topic, ProtocolMethod::SessionPing, Duration::from_secs(5), tx);

        a.interactor
            .handle_inbound(InboundMessage {
                topic: topic.clone(),
                payload: "AAAA".to_string(),
                published_at: None,
            })
            .await;
        assert_eq!(a.interactor.pending_requests().len(), 1);
    }
}
