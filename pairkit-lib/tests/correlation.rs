//! End-to-end request correlation over the in-memory relay.
//!
//! ```bash
//! cargo test -p pairkit-lib --test correlation
//! ```

use std::sync::Arc;
use std::time::Duration;

use pairkit_lib::config::RpcConfig;
use pairkit_lib::envelope::{derive_topic, derive_topic_for_public_key, EnvelopeKind};
use pairkit_lib::kms::{KeyManagementService, SymmetricKey};
use pairkit_lib::relay::{ConnectionStatus, RelaySubscriptionManager, RelayTransport};
use pairkit_lib::rpc::{NetworkingInteractor, ProtocolMethod, RequestOptions};
use pairkit_lib::secure_storage::InMemoryKeyStorage;
use pairkit_lib::storage::InMemoryKeyValueStore;
use pairkit_lib::test_utils::{MockRelayNetwork, MockRelayTransport};
use pairkit_lib::{PairkitError, Topic};
use serde_json::json;
use tokio::task::JoinSet;

async fn client(network: &Arc<MockRelayNetwork>) -> (Arc<NetworkingInteractor>, Arc<MockRelayTransport>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let transport = network.connected_transport().await;
    let kms = Arc::new(KeyManagementService::new(Arc::new(InMemoryKeyStorage::new())));
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
    (interactor, transport)
}

async fn share_key(key: &SymmetricKey, clients: &[&Arc<NetworkingInteractor>]) -> Topic {
    let topic = derive_topic(key);
    for client in clients {
        client.kms().set_symmetric_key(key, &topic).await.unwrap();
        client.subscribe(&topic).await.unwrap();
    }
    topic
}

/// Answer every request with its own params.
fn spawn_echo(interactor: &Arc<NetworkingInteractor>, method: ProtocolMethod) {
    let mut requests = interactor.register(method).unwrap();
    let interactor = Arc::clone(interactor);
    tokio::spawn(async move {
        while let Some(inbound) = requests.recv().await {
            interactor
                .respond_success(&inbound.topic, method, inbound.request.id, inbound.request.params)
                .await
                .unwrap();
        }
    });
}

#[tokio::test]
async fn test_concurrent_requests_resolve_to_their_own_responses() {
    let network = MockRelayNetwork::new();
    let (dapp, _) = client(&network).await;
    let (wallet, _) = client(&network).await;
    let topic = share_key(&SymmetricKey::generate(), &[&dapp, &wallet]).await;
    spawn_echo(&wallet, ProtocolMethod::SessionRequest);

    let mut tasks = JoinSet::new();
    for n in 0..20 {
        let dapp = Arc::clone(&dapp);
        let topic = topic.clone();
        tasks.spawn(async move {
            let result = dapp
                .request(&topic, ProtocolMethod::SessionRequest, json!({"n": n}))
                .await
                .unwrap();
            (n, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (n, result) = joined.unwrap();
        assert_eq!(result, json!({"n": n}));
    }
    assert!(dapp.pending_requests().is_empty());
}

#[tokio::test]
async fn test_pending_ids_are_unique() {
    let network = MockRelayNetwork::new();
    let (dapp, _) = client(&network).await;
    let (wallet, _) = client(&network).await;
    let topic = share_key(&SymmetricKey::generate(), &[&dapp, &wallet]).await;
    // Never answered, so every request stays pending until its timeout.
    let _silent = wallet.register(ProtocolMethod::SessionPing).unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..25 {
        let dapp = Arc::clone(&dapp);
        let topic = topic.clone();
        tasks.spawn(async move {
            let options = RequestOptions::default().with_timeout(Duration::from_millis(300));
            dapp.request_with(&topic, ProtocolMethod::SessionPing, json!({}), options)
                .await
        });
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = dapp.pending_requests();
    assert_eq!(pending.len(), 25);
    let ids: std::collections::HashSet<_> = pending.iter().map(|p| p.id).collect();
    assert_eq!(ids.len(), 25);

    while let Some(joined) = tasks.join_next().await {
        assert!(matches!(joined.unwrap(), Err(PairkitError::RequestTimeout { .. })));
    }
    assert!(dapp.pending_requests().is_empty());
}

#[tokio::test]
async fn test_responses_are_scoped_to_their_topic() {
    let network = MockRelayNetwork::new();
    let (dapp, _) = client(&network).await;
    let (wallet, _) = client(&network).await;
    let (stranger, _) = client(&network).await;
    let topic = share_key(&SymmetricKey::generate(), &[&dapp, &wallet]).await;
    share_key(&SymmetricKey::generate(), &[&dapp, &stranger]).await;
    spawn_echo(&wallet, ProtocolMethod::SessionEvent);

    let result = dapp
        .request(&topic, ProtocolMethod::SessionEvent, json!({"name": "chainChanged"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"name": "chainChanged"}));
}

#[tokio::test]
async fn test_type1_request_reaches_public_key_topic() {
    let network = MockRelayNetwork::new();
    let (dapp, _) = client(&network).await;
    let (wallet, _) = client(&network).await;

    let wallet_key = wallet.kms().generate_keypair().await.unwrap();
    let receive_topic = derive_topic_for_public_key(&wallet_key);
    wallet.kms().set_public_key(&wallet_key, &receive_topic).await.unwrap();
    wallet.subscribe(&receive_topic).await.unwrap();

    let mut requests = wallet.register(ProtocolMethod::SessionPing).unwrap();
    let dapp_key = dapp.kms().generate_keypair().await.unwrap();
    dapp.notify_sealed(&receive_topic, ProtocolMethod::SessionPing, json!({}), EnvelopeKind::Agreement {
        sender_public_key: dapp_key,
        receiver_public_key: wallet_key,
    })
    .await
    .unwrap();

    let inbound = tokio::time::timeout(Duration::from_secs(1), requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbound.topic, receive_topic);
    assert_eq!(inbound.sender_public_key, Some(dapp_key));
}

#[tokio::test]
async fn test_tampered_message_is_dropped_and_request_still_completes() {
    let network = MockRelayNetwork::new();
    let (dapp, dapp_transport) = client(&network).await;
    let (wallet, _) = client(&network).await;
    let topic = share_key(&SymmetricKey::generate(), &[&dapp, &wallet]).await;
    spawn_echo(&wallet, ProtocolMethod::SessionPing);

    dapp_transport.inject(&topic, "not an envelope");
    dapp_transport.inject(&topic, "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");

    let result = dapp
        .request(&topic, ProtocolMethod::SessionPing, json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true}));
}
