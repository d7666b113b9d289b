//! Composition root: builds every layer in dependency order and runs the
//! background tasks.

use std::sync::Arc;

use pairkit_lib::kms::KeyManagementService;
use pairkit_lib::pairing::{Pairing, PairingEngine};
use pairkit_lib::relay::{RelaySubscriptionManager, RelayTransport};
use pairkit_lib::rpc::NetworkingInteractor;
use pairkit_lib::secure_storage::SecureKeyStorage;
use pairkit_lib::storage::KeyValueStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SignConfig;
use crate::session::{SessionEngine, SignEvent};
use crate::Result;

/// A sign client: one per application instance.
///
/// Dropping the client stops its background tasks.
pub struct SignClient {
    relay: Arc<RelaySubscriptionManager>,
    pairing: Arc<PairingEngine>,
    sessions: Arc<SessionEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignClient {
    /// Build the client and start serving inbound messages.
    ///
    /// If the transport is already connected, every persisted topic is
    /// resubscribed before this returns.
    pub async fn new(
        config: SignConfig,
        transport: Arc<dyn RelayTransport>,
        store: Arc<dyn KeyValueStore>,
        secure: Arc<dyn SecureKeyStorage>,
    ) -> Result<Self> {
        let kms = Arc::new(KeyManagementService::new(secure));
        let relay = Arc::new(RelaySubscriptionManager::new(
            Arc::clone(&transport),
            Arc::clone(&store),
        ));
        let interactor = Arc::new(NetworkingInteractor::new(
            kms,
            Arc::clone(&relay),
            config.core.rpc.clone(),
        ));
        let pairing = Arc::new(PairingEngine::new(
            Arc::clone(&interactor),
            Arc::clone(&store),
            config.core.clone(),
        ));
        let sweep_interval = config.sweep_interval();
        let sessions = Arc::new(SessionEngine::new(Arc::clone(&pairing), store, config));

        // Receivers first, so nothing published during startup is missed.
        let inbound = transport.inbound_messages();
        let status_events = transport.status_events();

        let mut tasks = vec![
            tokio::spawn(Arc::clone(&interactor).run(inbound)),
            tokio::spawn(Arc::clone(&relay).run_status_loop(status_events)),
        ];
        tasks.extend(pairing.start()?);
        tasks.extend(sessions.start()?);
        tasks.push(tokio::spawn(sweep_loop(
            Arc::clone(&pairing),
            Arc::clone(&sessions),
            sweep_interval,
        )));

        relay.handle_status(transport.status()).await;
        tracing::debug!("sign client started");

        Ok(Self {
            relay,
            pairing,
            sessions,
            tasks,
        })
    }

    pub fn relay(&self) -> &Arc<RelaySubscriptionManager> {
        &self.relay
    }

    pub fn pairing(&self) -> &Arc<PairingEngine> {
        &self.pairing
    }

    pub fn sessions(&self) -> &Arc<SessionEngine> {
        &self.sessions
    }

    pub fn events(&self) -> broadcast::Receiver<SignEvent> {
        self.sessions.events()
    }

    /// Join a pairing from a URI; proposals sent on it surface as
    /// [`SignEvent::SessionProposal`].
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        Ok(self.pairing.pair(uri).await?)
    }
}

impl Drop for SignClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn sweep_loop(
    pairing: Arc<PairingEngine>,
    sessions: Arc<SessionEngine>,
    period: std::time::Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = sessions.sweep_expired().await {
            tracing::warn!(error = %e, "session sweep failed");
        }
        if let Err(e) = pairing.sweep_expired().await {
            tracing::warn!(error = %e, "pairing sweep failed");
        }
    }
}
