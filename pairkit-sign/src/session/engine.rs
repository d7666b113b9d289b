//! Session lifecycle: proposal, settlement, requests, updates and expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use pairkit_lib::kms::PublicKey;
use pairkit_lib::pairing::{PairingEngine, PairingUri, RelayProtocolOptions};
use pairkit_lib::rpc::{
    error_codes, ErrorObject, InboundRequest, NetworkingInteractor, ProtocolMethod, RequestOptions,
    RpcId,
};
use pairkit_lib::storage::{KeyValueStore, TypedStore};
use pairkit_lib::{PairkitError, Topic};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::types::{
    EventPayload, Participant, ProposalContext, RequestPayload, Session, SessionEventParams,
    SessionExtendParams, SessionProposal, SessionProposeParams, SessionProposeResponse,
    SessionRequest, SessionRequestParams, SessionSettleParams, SessionUpdateParams, SignEvent,
};
use crate::config::SignConfig;
use crate::namespaces::{
    validate_approved, validate_proposal, validate_session, validate_session_properties, Blockchain,
    ProposalNamespaces, SessionNamespaces, SessionProperties,
};
use crate::{reasons, Result, SignError, Unauthorized};

pub const SESSIONS_COLLECTION: &str = "sessions";
pub const PROPOSALS_COLLECTION: &str = "session_proposals";
const CONTEXTS_COLLECTION: &str = "session_contexts";

const EVENT_CAPACITY: usize = 128;

/// Methods served on session topics.
const SESSION_METHODS: [ProtocolMethod; 7] = [
    ProtocolMethod::SessionSettle,
    ProtocolMethod::SessionUpdate,
    ProtocolMethod::SessionExtend,
    ProtocolMethod::SessionRequest,
    ProtocolMethod::SessionEvent,
    ProtocolMethod::SessionDelete,
    ProtocolMethod::SessionPing,
];

/// A proposal sent by [`SessionEngine::connect`].
pub struct Connection {
    /// URI to hand to the approver, when a new pairing was created.
    pub uri: Option<PairingUri>,
    pub pairing_topic: Topic,
    approval: oneshot::Receiver<Result<Session>>,
}

impl Connection {
    /// Wait until the peer settles the session or rejects the proposal.
    pub async fn approval(self) -> Result<Session> {
        self.approval
            .await
            .map_err(|_| SignError::Core(PairkitError::Internal("proposal abandoned".into())))?
    }
}

/// Drives sessions for both roles: proposer (`connect`) and approver
/// (`approve`/`reject`).
pub struct SessionEngine {
    interactor: Arc<NetworkingInteractor>,
    pairing: Arc<PairingEngine>,
    sessions: TypedStore<Session>,
    proposals: TypedStore<SessionProposal>,
    contexts: TypedStore<ProposalContext>,
    config: SignConfig,
    events: broadcast::Sender<SignEvent>,
    // Keyed by the proposer's session public key.
    waiters: StdMutex<HashMap<PublicKey, oneshot::Sender<Result<Session>>>>,
    write_lock: Mutex<()>,
}

impl SessionEngine {
    pub fn new(pairing: Arc<PairingEngine>, store: Arc<dyn KeyValueStore>, config: SignConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            interactor: Arc::clone(pairing.interactor()),
            pairing,
            sessions: TypedStore::new(Arc::clone(&store), SESSIONS_COLLECTION),
            proposals: TypedStore::new(Arc::clone(&store), PROPOSALS_COLLECTION),
            contexts: TypedStore::new(store, CONTEXTS_COLLECTION),
            config,
            events,
            waiters: StdMutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SignEvent> {
        self.events.subscribe()
    }

    fn emit_event(&self, event: SignEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn self_participant(&self, public_key: PublicKey) -> Participant {
        Participant {
            public_key,
            metadata: self.config.metadata.clone(),
        }
    }

    fn relay_options(&self) -> RelayProtocolOptions {
        RelayProtocolOptions {
            protocol: self.config.core.relay.protocol.clone(),
            data: self.config.core.relay.protocol_data.clone(),
        }
    }

    fn take_waiter(&self, public_key: &PublicKey) -> Option<oneshot::Sender<Result<Session>>> {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(public_key)
    }

    // Proposer side

    /// Propose a session, on a new pairing or on `pairing_topic`.
    ///
    /// Returns once the proposal is on its way; the settlement is awaited
    /// with [`Connection::approval`] and is also surfaced as
    /// [`SignEvent::SessionSettled`].
    #[tracing::instrument(skip_all)]
    pub async fn connect(
        self: &Arc<Self>,
        required: ProposalNamespaces,
        optional: Option<ProposalNamespaces>,
        properties: Option<SessionProperties>,
        pairing_topic: Option<Topic>,
    ) -> Result<Connection> {
        validate_proposal(&required)?;
        if let Some(optional) = &optional {
            validate_proposal(optional)?;
        }
        validate_session_properties(properties.as_ref())?;

        let (uri, pairing_topic) = match pairing_topic {
            Some(topic) => {
                self.pairing.get_pairing(&topic).await?;
                (None, topic)
            }
            None => {
                let uri = self.pairing.create().await?;
                let topic = uri.topic.clone();
                (Some(uri), topic)
            }
        };

        let public_key = self.interactor.kms().generate_keypair().await?;
        let params = SessionProposeParams {
            relays: vec![self.relay_options()],
            proposer: self.self_participant(public_key),
            required_namespaces: required,
            optional_namespaces: optional,
            session_properties: properties,
            expiry_timestamp: Some(Utc::now().timestamp() + self.config.proposal_ttl_secs),
        };
        let payload = serde_json::to_value(&params).map_err(PairkitError::from)?;

        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(public_key, tx);

        let engine = Arc::clone(self);
        let topic = pairing_topic.clone();
        tokio::spawn(async move { engine.await_proposal_response(topic, params, payload).await });

        tracing::debug!(pairing_topic = %pairing_topic, "session proposed");
        Ok(Connection {
            uri,
            pairing_topic,
            approval: rx,
        })
    }

    async fn await_proposal_response(
        self: Arc<Self>,
        pairing_topic: Topic,
        params: SessionProposeParams,
        payload: Value,
    ) {
        let public_key = params.proposer.public_key;
        let options = RequestOptions::default().with_timeout(self.config.proposal_ttl());
        let response = self
            .interactor
            .request_as::<SessionProposeResponse>(
                &pairing_topic,
                ProtocolMethod::SessionPropose,
                payload,
                options,
            )
            .await;

        let outcome = match response {
            Ok(response) => self.on_proposal_accepted(&pairing_topic, &params, response).await,
            Err(e) => {
                let reason = match &e {
                    PairkitError::Rpc { code, message } => ErrorObject::new(*code, message.clone()),
                    other => ErrorObject::new(error_codes::INTERNAL_ERROR, other.to_string()),
                };
                tracing::debug!(pairing_topic = %pairing_topic, error = %e, "proposal not accepted");
                self.emit_event(SignEvent::SessionRejected {
                    pairing_topic: pairing_topic.clone(),
                    reason,
                });
                Err(e.into())
            }
        };

        if let Err(e) = outcome {
            if let Err(cleanup) = self.interactor.kms().delete_private_key(&public_key).await {
                tracing::warn!(error = %cleanup, "could not delete proposal key");
            }
            if let Some(waiter) = self.take_waiter(&public_key) {
                let _ = waiter.send(Err(e));
            }
        }
    }

    async fn on_proposal_accepted(
        &self,
        pairing_topic: &Topic,
        params: &SessionProposeParams,
        response: SessionProposeResponse,
    ) -> Result<()> {
        let (session_topic, _) = self
            .interactor
            .kms()
            .perform_key_agreement(&params.proposer.public_key, &response.responder_public_key)
            .await?;
        let context = ProposalContext {
            session_topic: session_topic.clone(),
            pairing_topic: pairing_topic.clone(),
            self_participant: params.proposer.clone(),
            peer_public_key: response.responder_public_key,
            required_namespaces: params.required_namespaces.clone(),
            optional_namespaces: params.optional_namespaces.clone(),
            expiry: params
                .expiry_timestamp
                .unwrap_or_else(|| Utc::now().timestamp() + self.config.proposal_ttl_secs),
        };
        // Stored before subscribing: the settlement may already be waiting
        // on the relay.
        self.contexts.set(session_topic.as_str(), &context).await?;
        self.interactor.subscribe(&session_topic).await?;
        tracing::debug!(session_topic = %session_topic, "proposal accepted, awaiting settlement");
        Ok(())
    }

    async fn on_settle(&self, inbound: &InboundRequest) -> Result<()> {
        let topic = &inbound.topic;
        let id = inbound.request.id;
        let Some(context) = self.contexts.get(topic.as_str()).await? else {
            return Err(SignError::SessionNotFound(topic.to_string()));
        };

        match self.settle(inbound, &context).await {
            Ok(session) => {
                self.interactor
                    .respond_success(topic, ProtocolMethod::SessionSettle, id, Value::Bool(true))
                    .await?;
                if let Err(e) = self.pairing.activate(&session.pairing_topic).await {
                    tracing::debug!(error = %e, "could not activate pairing");
                }
                if let Err(e) = self
                    .pairing
                    .update_metadata(&session.pairing_topic, session.peer_participant.metadata.clone())
                    .await
                {
                    tracing::debug!(error = %e, "could not store peer metadata");
                }
                tracing::info!(topic = %topic, "session settled");
                self.emit_event(SignEvent::SessionSettled(session.clone()));
                if let Some(waiter) = self.take_waiter(&context.self_participant.public_key) {
                    let _ = waiter.send(Ok(session));
                }
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "settlement rejected");
                if let Err(reply) = self
                    .interactor
                    .respond_error(topic, ProtocolMethod::SessionSettle, id, e.rpc_reason())
                    .await
                {
                    tracing::debug!(error = %reply, "could not reject settlement");
                }
                self.discard_context(&context).await?;
                if let Some(waiter) = self.take_waiter(&context.self_participant.public_key) {
                    let _ = waiter.send(Err(e));
                }
            }
        }
        Ok(())
    }

    async fn settle(&self, inbound: &InboundRequest, context: &ProposalContext) -> Result<Session> {
        let params: SessionSettleParams = inbound.request.params_as()?;
        if params.controller.public_key != context.peer_public_key {
            return Err(PairkitError::rpc(
                reasons::SESSION_SETTLEMENT_FAILED,
                "settlement from an unexpected controller",
            )
            .into());
        }
        validate_session(&params.namespaces)?;
        validate_approved(&params.namespaces, &context.required_namespaces)?;
        validate_session_properties(params.session_properties.as_ref())?;

        let session = Session {
            topic: inbound.topic.clone(),
            pairing_topic: context.pairing_topic.clone(),
            relay: params.relay,
            namespaces: params.namespaces,
            required_namespaces: context.required_namespaces.clone(),
            optional_namespaces: context.optional_namespaces.clone(),
            session_properties: params.session_properties,
            expiry: params.expiry,
            self_participant: context.self_participant.clone(),
            controller_public_key: params.controller.public_key,
            peer_participant: params.controller,
            acknowledged: true,
        };
        self.sessions.set(session.topic.as_str(), &session).await?;
        self.contexts.delete(session.topic.as_str()).await?;
        Ok(session)
    }

    async fn discard_context(&self, context: &ProposalContext) -> Result<()> {
        let kms = self.interactor.kms();
        self.interactor.unsubscribe(&context.session_topic).await?;
        kms.delete_symmetric_key(&context.session_topic).await?;
        kms.delete_private_key(&context.self_participant.public_key).await?;
        self.contexts.delete(context.session_topic.as_str()).await?;
        Ok(())
    }

    // Approver side

    async fn on_propose(&self, inbound: &InboundRequest) -> Result<()> {
        // Proposals only travel over pairings.
        if let Err(e) = self.pairing.get_pairing(&inbound.topic).await {
            tracing::debug!(topic = %inbound.topic, error = %e, "proposal on a topic with no pairing");
            return Err(PairkitError::rpc(reasons::NO_MATCHING_KEY, "No matching key.").into());
        }
        let params: SessionProposeParams = inbound.request.params_as()?;
        validate_proposal(&params.required_namespaces)?;
        if let Some(optional) = &params.optional_namespaces {
            validate_proposal(optional)?;
        }
        validate_session_properties(params.session_properties.as_ref())?;

        let now = Utc::now().timestamp();
        let expiry = params
            .expiry_timestamp
            .unwrap_or(now + self.config.proposal_ttl_secs);
        let id = inbound.request.id;
        if expiry <= now {
            return Err(SignError::ProposalExpired(id.to_string()));
        }

        let proposal = SessionProposal {
            id,
            pairing_topic: inbound.topic.clone(),
            proposer: params.proposer,
            relays: params.relays,
            required_namespaces: params.required_namespaces,
            optional_namespaces: params.optional_namespaces,
            session_properties: params.session_properties,
            expiry,
        };
        self.proposals.set(&id.to_string(), &proposal).await?;
        if let Err(e) = self
            .pairing
            .update_metadata(&proposal.pairing_topic, proposal.proposer.metadata.clone())
            .await
        {
            tracing::debug!(error = %e, "could not store proposer metadata");
        }
        tracing::debug!(id = %id, "session proposal received");
        self.emit_event(SignEvent::SessionProposal(proposal));
        Ok(())
    }

    async fn get_proposal(&self, id: RpcId) -> Result<SessionProposal> {
        let key = id.to_string();
        let proposal = self
            .proposals
            .get(&key)
            .await?
            .ok_or_else(|| SignError::ProposalNotFound(key.clone()))?;
        if proposal.is_expired_at(Utc::now().timestamp()) {
            self.proposals.delete(&key).await?;
            return Err(SignError::ProposalExpired(key));
        }
        Ok(proposal)
    }

    /// Proposals waiting for an answer; expired ones are dropped.
    pub async fn pending_proposals(&self) -> Result<Vec<SessionProposal>> {
        let now = Utc::now().timestamp();
        let mut pending = Vec::new();
        for proposal in self.proposals.get_all().await? {
            if proposal.is_expired_at(now) {
                self.proposals.delete(&proposal.id.to_string()).await?;
            } else {
                pending.push(proposal);
            }
        }
        Ok(pending)
    }

    /// Accept a proposal with the granted `namespaces` and settle the
    /// session.
    ///
    /// Namespaces that do not cover the proposal's requirements reject the
    /// proposal with the matching reason and return the validation error.
    /// Returns once the proposer acknowledged the settlement.
    #[tracing::instrument(skip(self, id, namespaces, properties), fields(id = %id))]
    pub async fn approve(
        &self,
        id: RpcId,
        namespaces: SessionNamespaces,
        properties: Option<SessionProperties>,
    ) -> Result<Session> {
        let proposal = self.get_proposal(id).await?;

        let validation = validate_session(&namespaces)
            .and_then(|()| validate_approved(&namespaces, &proposal.required_namespaces))
            .map_err(SignError::from)
            .and_then(|()| validate_session_properties(properties.as_ref()));
        if let Err(e) = validation {
            tracing::warn!(error = %e, "approval does not satisfy proposal");
            if let Err(reply) = self
                .interactor
                .respond_error(&proposal.pairing_topic, ProtocolMethod::SessionPropose, id, e.rpc_reason())
                .await
            {
                tracing::debug!(error = %reply, "could not reject proposal");
            }
            self.proposals.delete(&id.to_string()).await?;
            return Err(e);
        }

        let kms = self.interactor.kms();
        let public_key = kms.generate_keypair().await?;
        let session_topic = match kms
            .perform_key_agreement(&public_key, &proposal.proposer.public_key)
            .await
        {
            Ok((topic, _)) => topic,
            Err(e) => {
                if let Err(cleanup) = kms.delete_private_key(&public_key).await {
                    tracing::warn!(error = %cleanup, "could not discard responder key");
                }
                return Err(e.into());
            }
        };

        let mut session = Session {
            topic: session_topic,
            pairing_topic: proposal.pairing_topic.clone(),
            relay: proposal.relays.first().cloned().unwrap_or_default(),
            namespaces,
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            session_properties: properties,
            expiry: Utc::now().timestamp() + self.config.session_ttl_secs,
            self_participant: self.self_participant(public_key),
            peer_participant: proposal.proposer.clone(),
            controller_public_key: public_key,
            acknowledged: false,
        };

        if let Err(e) = self.settle_approved(&proposal, &mut session).await {
            tracing::warn!(topic = %session.topic, error = %e, "settlement failed");
            if let Err(cleanup) = self.cleanup(&session).await {
                tracing::warn!(error = %cleanup, "could not discard failed session");
            }
            return Err(e);
        }

        if let Err(e) = self.pairing.activate(&session.pairing_topic).await {
            tracing::debug!(error = %e, "could not activate pairing");
        }
        tracing::info!(topic = %session.topic, "session settled");
        self.emit_event(SignEvent::SessionSettled(session.clone()));
        Ok(session)
    }

    async fn settle_approved(&self, proposal: &SessionProposal, session: &mut Session) -> Result<()> {
        self.interactor.subscribe(&session.topic).await?;
        let response = serde_json::to_value(SessionProposeResponse {
            relay: session.relay.clone(),
            responder_public_key: session.self_participant.public_key,
        })
        .map_err(PairkitError::from)?;
        self.interactor
            .respond_success(&proposal.pairing_topic, ProtocolMethod::SessionPropose, proposal.id, response)
            .await?;
        self.proposals.delete(&proposal.id.to_string()).await?;
        self.sessions.set(session.topic.as_str(), session).await?;

        let settle = serde_json::to_value(SessionSettleParams {
            relay: session.relay.clone(),
            controller: session.self_participant.clone(),
            namespaces: session.namespaces.clone(),
            session_properties: session.session_properties.clone(),
            expiry: session.expiry,
        })
        .map_err(PairkitError::from)?;
        self.interactor
            .request(&session.topic, ProtocolMethod::SessionSettle, settle)
            .await?;

        session.acknowledged = true;
        self.sessions.set(session.topic.as_str(), session).await?;
        Ok(())
    }

    /// Decline a proposal, sending `reason` to the proposer.
    pub async fn reject(&self, id: RpcId, reason: ErrorObject) -> Result<()> {
        let proposal = self.get_proposal(id).await?;
        self.proposals.delete(&id.to_string()).await?;
        self.interactor
            .respond_error(&proposal.pairing_topic, ProtocolMethod::SessionPropose, id, reason)
            .await?;
        tracing::debug!(id = %id, "proposal rejected");
        Ok(())
    }

    // Both sides

    /// Look up a session. Expired sessions are removed on access.
    pub async fn get_session(&self, topic: &Topic) -> Result<Session> {
        let session = self
            .sessions
            .get(topic.as_str())
            .await?
            .ok_or_else(|| SignError::SessionNotFound(topic.to_string()))?;
        if session.is_expired_at(Utc::now().timestamp()) {
            self.expire(&session).await?;
            return Err(SignError::SessionExpired(topic.to_string()));
        }
        Ok(session)
    }

    /// All live sessions; expired ones are removed on the way.
    pub async fn get_sessions(&self) -> Result<Vec<Session>> {
        self.sweep_expired().await?;
        Ok(self.sessions.get_all().await?)
    }

    /// Remove expired sessions, proposals and unsettled proposal state.
    /// Returns the topics of the sessions removed.
    pub async fn sweep_expired(&self) -> Result<Vec<Topic>> {
        let now = Utc::now().timestamp();
        let mut removed = Vec::new();
        for session in self.sessions.get_all().await? {
            if session.is_expired_at(now) {
                self.expire(&session).await?;
                removed.push(session.topic);
            }
        }
        for proposal in self.proposals.get_all().await? {
            if proposal.is_expired_at(now) {
                self.proposals.delete(&proposal.id.to_string()).await?;
            }
        }
        for context in self.contexts.get_all().await? {
            if context.expiry <= now {
                self.discard_context(&context).await?;
                if let Some(waiter) = self.take_waiter(&context.self_participant.public_key) {
                    let _ = waiter.send(Err(SignError::ProposalExpired(context.pairing_topic.to_string())));
                }
            }
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "expired sessions removed");
        }
        Ok(removed)
    }

    async fn expire(&self, session: &Session) -> Result<()> {
        self.cleanup(session).await?;
        tracing::debug!(topic = %session.topic, "session expired");
        self.emit_event(SignEvent::SessionExpired {
            topic: session.topic.clone(),
        });
        Ok(())
    }

    async fn cleanup(&self, session: &Session) -> Result<()> {
        let kms = self.interactor.kms();
        self.interactor.unsubscribe(&session.topic).await?;
        kms.delete_symmetric_key(&session.topic).await?;
        kms.delete_private_key(&session.self_participant.public_key)
            .await?;
        self.sessions.delete(session.topic.as_str()).await?;
        Ok(())
    }

    /// Send a request to the peer on a chain the session grants `method`
    /// for, and wait for its result.
    pub async fn request(
        &self,
        topic: &Topic,
        chain_id: &Blockchain,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let session = self.get_session(topic).await?;
        if !session.allows_method(chain_id, method) {
            return Err(Unauthorized::Method {
                chain: chain_id.to_string(),
                method: method.to_string(),
            }
            .into());
        }
        let params = SessionRequestParams {
            request: RequestPayload {
                method: method.to_string(),
                params,
                expiry_timestamp: None,
            },
            chain_id: chain_id.clone(),
        };
        let params = serde_json::to_value(&params).map_err(PairkitError::from)?;
        Ok(self
            .interactor
            .request(topic, ProtocolMethod::SessionRequest, params)
            .await?)
    }

    /// Answer a [`SignEvent::SessionRequest`].
    pub async fn respond(
        &self,
        topic: &Topic,
        id: RpcId,
        result: std::result::Result<Value, ErrorObject>,
    ) -> Result<()> {
        self.get_session(topic).await?;
        match result {
            Ok(value) => {
                self.interactor
                    .respond_success(topic, ProtocolMethod::SessionRequest, id, value)
                    .await?
            }
            Err(error) => {
                self.interactor
                    .respond_error(topic, ProtocolMethod::SessionRequest, id, error)
                    .await?
            }
        }
        Ok(())
    }

    /// Emit an event the session grants on `chain_id`.
    pub async fn emit(&self, topic: &Topic, chain_id: &Blockchain, event: EventPayload) -> Result<()> {
        let session = self.get_session(topic).await?;
        if !session.allows_event(chain_id, &event.name) {
            return Err(Unauthorized::Event {
                chain: chain_id.to_string(),
                event: event.name,
            }
            .into());
        }
        let params = SessionEventParams {
            event,
            chain_id: chain_id.clone(),
        };
        let params = serde_json::to_value(&params).map_err(PairkitError::from)?;
        self.interactor
            .request(topic, ProtocolMethod::SessionEvent, params)
            .await?;
        Ok(())
    }

    /// Replace the granted namespaces. Controller only; the new namespaces
    /// must still cover the proposal's requirements.
    #[tracing::instrument(skip(self, topic, namespaces), fields(topic = %topic))]
    pub async fn update(&self, topic: &Topic, namespaces: SessionNamespaces) -> Result<Session> {
        let session = self.get_session(topic).await?;
        if !session.is_controller() {
            return Err(Unauthorized::Update.into());
        }
        validate_session(&namespaces)?;
        validate_approved(&namespaces, &session.required_namespaces)?;

        let params = serde_json::to_value(SessionUpdateParams {
            namespaces: namespaces.clone(),
        })
        .map_err(PairkitError::from)?;
        self.interactor
            .request(topic, ProtocolMethod::SessionUpdate, params)
            .await?;

        // Re-read under the lock so a concurrent extend is not undone.
        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(topic).await?;
        session.namespaces = namespaces;
        self.sessions.set(topic.as_str(), &session).await?;
        Ok(session)
    }

    /// Push the expiry a full session lifetime from now. Controller only.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn extend(&self, topic: &Topic) -> Result<Session> {
        let session = self.get_session(topic).await?;
        if !session.is_controller() {
            return Err(Unauthorized::Extend.into());
        }
        let expiry = Utc::now().timestamp() + self.config.session_ttl_secs;
        let params = serde_json::to_value(SessionExtendParams { expiry }).map_err(PairkitError::from)?;
        self.interactor
            .request(topic, ProtocolMethod::SessionExtend, params)
            .await?;

        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(topic).await?;
        session.expiry = expiry;
        self.sessions.set(topic.as_str(), &session).await?;
        Ok(session)
    }

    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        self.get_session(topic).await?;
        self.interactor
            .request(topic, ProtocolMethod::SessionPing, serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// End a session. The peer is told with `wc_sessionDelete` on a
    /// best-effort basis.
    #[tracing::instrument(skip(self, topic), fields(topic = %topic))]
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        let session = self.get_session(topic).await?;
        let reason = serde_json::to_value(reasons::user_disconnected()).map_err(PairkitError::from)?;
        if let Err(e) = self
            .interactor
            .notify(topic, ProtocolMethod::SessionDelete, reason)
            .await
        {
            tracing::warn!(error = %e, "could not notify peer of session delete");
        }
        self.cleanup(&session).await
    }

    // Inbound session requests

    async fn on_update(&self, inbound: &InboundRequest) -> Result<()> {
        let session = self.get_session(&inbound.topic).await?;
        if session.is_controller() {
            return Err(Unauthorized::Update.into());
        }
        let params: SessionUpdateParams = inbound.request.params_as()?;
        validate_session(&params.namespaces)?;
        validate_approved(&params.namespaces, &session.required_namespaces)?;

        {
            let _guard = self.write_lock.lock().await;
            let mut session = self.get_session(&inbound.topic).await?;
            session.namespaces = params.namespaces.clone();
            self.sessions.set(inbound.topic.as_str(), &session).await?;
        }
        self.acknowledge(inbound, ProtocolMethod::SessionUpdate).await?;
        self.emit_event(SignEvent::SessionUpdated {
            topic: inbound.topic.clone(),
            namespaces: params.namespaces,
        });
        Ok(())
    }

    async fn on_extend(&self, inbound: &InboundRequest) -> Result<()> {
        let session = self.get_session(&inbound.topic).await?;
        if session.is_controller() {
            return Err(Unauthorized::Extend.into());
        }
        let SessionExtendParams { expiry } = inbound.request.params_as()?;
        let ceiling = Utc::now().timestamp() + self.config.session_ttl_secs;
        if expiry < session.expiry || expiry > ceiling {
            return Err(SignError::InvalidExpiry(expiry));
        }

        {
            let _guard = self.write_lock.lock().await;
            let mut session = self.get_session(&inbound.topic).await?;
            session.expiry = expiry;
            self.sessions.set(inbound.topic.as_str(), &session).await?;
        }
        self.acknowledge(inbound, ProtocolMethod::SessionExtend).await?;
        self.emit_event(SignEvent::SessionExtended {
            topic: inbound.topic.clone(),
            expiry,
        });
        Ok(())
    }

    async fn on_request(&self, inbound: &InboundRequest) -> Result<()> {
        let session = self.get_session(&inbound.topic).await?;
        let params: SessionRequestParams = inbound.request.params_as()?;
        if !session.allows_method(&params.chain_id, &params.request.method) {
            return Err(Unauthorized::Method {
                chain: params.chain_id.to_string(),
                method: params.request.method,
            }
            .into());
        }
        if params
            .request
            .expiry_timestamp
            .is_some_and(|expiry| expiry <= Utc::now().timestamp())
        {
            return Err(PairkitError::rpc(error_codes::INVALID_PARAMS, "request expired").into());
        }
        self.emit_event(SignEvent::SessionRequest(SessionRequest {
            topic: inbound.topic.clone(),
            id: inbound.request.id,
            chain_id: params.chain_id,
            method: params.request.method,
            params: params.request.params,
        }));
        Ok(())
    }

    async fn on_event(&self, inbound: &InboundRequest) -> Result<()> {
        let session = self.get_session(&inbound.topic).await?;
        let params: SessionEventParams = inbound.request.params_as()?;
        if !session.allows_event(&params.chain_id, &params.event.name) {
            return Err(Unauthorized::Event {
                chain: params.chain_id.to_string(),
                event: params.event.name,
            }
            .into());
        }
        self.acknowledge(inbound, ProtocolMethod::SessionEvent).await?;
        self.emit_event(SignEvent::SessionEvent {
            topic: inbound.topic.clone(),
            chain_id: params.chain_id,
            event: params.event,
        });
        Ok(())
    }

    async fn on_delete(&self, inbound: &InboundRequest) -> Result<()> {
        let session = self.get_session(&inbound.topic).await?;
        let reason = inbound
            .request
            .params_as::<ErrorObject>()
            .unwrap_or_else(|_| reasons::user_disconnected());
        // The reply has to go out while the key still exists.
        if let Err(e) = self.acknowledge(inbound, ProtocolMethod::SessionDelete).await {
            tracing::debug!(error = %e, "could not acknowledge session delete");
        }
        self.cleanup(&session).await?;
        tracing::info!(topic = %inbound.topic, code = reason.code, "session deleted by peer");
        self.emit_event(SignEvent::SessionDeleted {
            topic: inbound.topic.clone(),
            reason,
        });
        Ok(())
    }

    async fn on_ping(&self, inbound: &InboundRequest) -> Result<()> {
        self.get_session(&inbound.topic).await?;
        self.acknowledge(inbound, ProtocolMethod::SessionPing).await
    }

    async fn acknowledge(&self, inbound: &InboundRequest, method: ProtocolMethod) -> Result<()> {
        self.interactor
            .respond_success(&inbound.topic, method, inbound.request.id, Value::Bool(true))
            .await?;
        Ok(())
    }

    async fn handle(&self, method: ProtocolMethod, inbound: &InboundRequest) -> Result<()> {
        match method {
            ProtocolMethod::SessionPropose => self.on_propose(inbound).await,
            ProtocolMethod::SessionSettle => self.on_settle(inbound).await,
            ProtocolMethod::SessionUpdate => self.on_update(inbound).await,
            ProtocolMethod::SessionExtend => self.on_extend(inbound).await,
            ProtocolMethod::SessionRequest => self.on_request(inbound).await,
            ProtocolMethod::SessionEvent => self.on_event(inbound).await,
            ProtocolMethod::SessionDelete => self.on_delete(inbound).await,
            ProtocolMethod::SessionPing => self.on_ping(inbound).await,
            ProtocolMethod::PairingDelete | ProtocolMethod::PairingPing => Err(PairkitError::Internal(
                format!("{} is served by the pairing engine", method),
            )
            .into()),
        }
    }

    async fn serve(self: Arc<Self>, method: ProtocolMethod, mut requests: mpsc::Receiver<InboundRequest>) {
        while let Some(inbound) = requests.recv().await {
            if let Err(e) = self.handle(method, &inbound).await {
                tracing::warn!(method = %method, topic = %inbound.topic, error = %e, "inbound request refused");
                if let Err(reply) = self
                    .interactor
                    .respond_error(&inbound.topic, method, inbound.request.id, e.rpc_reason())
                    .await
                {
                    tracing::debug!(error = %reply, "could not send error reply");
                }
            }
        }
    }

    /// Register the proposal and session handlers and spawn their loops.
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(SESSION_METHODS.len() + 1);
        let proposals = self.pairing.register(ProtocolMethod::SessionPropose)?;
        handles.push(tokio::spawn(
            Arc::clone(self).serve(ProtocolMethod::SessionPropose, proposals),
        ));
        for method in SESSION_METHODS {
            let requests = self.interactor.register(method)?;
            handles.push(tokio::spawn(Arc::clone(self).serve(method, requests)));
        }
        Ok(handles)
    }
}
