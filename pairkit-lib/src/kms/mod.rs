//! Key management service.
//!
//! The KMS owns every secret the client holds: x25519 private keys, the
//! symmetric key of each topic, and the receiver public key registered for
//! type-1 topics. Secrets are persisted through [`SecureKeyStorage`] under
//! prefixed identifiers:
//!
//! | identifier          | content                               |
//! |---------------------|---------------------------------------|
//! | `priv:{public hex}` | x25519 private key                    |
//! | `sym:{topic}`       | symmetric key for a topic             |
//! | `pub:{topic}`       | own public key receiving on a topic   |
//!
//! Private keys never leave the KMS; callers refer to a keypair by its public
//! half.

mod keys;

use std::sync::Arc;

use rand::rngs::OsRng;
use tokio::sync::Mutex;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::envelope::derive_topic;
use crate::errors::PairkitError;
use crate::secure_storage::{SecureKeyStorage, StoreOptions};
use crate::{Result, Topic};

pub use keys::{AgreementKeys, PublicKey, SymmetricKey, KEY_LENGTH};
pub(crate) use keys::derive_shared_key;

fn private_key_id(public_key: &PublicKey) -> String {
    format!("priv:{}", public_key.to_hex())
}

fn symmetric_key_id(topic: &Topic) -> String {
    format!("sym:{}", topic)
}

fn public_key_id(topic: &Topic) -> String {
    format!("pub:{}", topic)
}

/// Key management service.
pub struct KeyManagementService {
    storage: Arc<dyn SecureKeyStorage>,
    // Serializes derive-then-store and delete sequences so a lookup never
    // observes a half-written topic entry.
    write_lock: Mutex<()>,
}

impl KeyManagementService {
    pub fn new(storage: Arc<dyn SecureKeyStorage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Generate and persist a new x25519 keypair, returning its public half.
    pub async fn generate_keypair(&self) -> Result<PublicKey> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&secret);
        let bytes = Zeroizing::new(secret.to_bytes());

        let _guard = self.write_lock.lock().await;
        self.storage
            .store(&private_key_id(&public_key), bytes.as_slice(), StoreOptions::new())
            .await?;
        tracing::debug!(public_key = %public_key, "generated keypair");
        Ok(public_key)
    }

    pub(crate) async fn get_private_key(&self, public_key: &PublicKey) -> Result<StaticSecret> {
        let id = private_key_id(public_key);
        let bytes = self
            .storage
            .retrieve(&id)
            .await?
            .ok_or(PairkitError::KeyNotFound(id))?;
        let array = <[u8; KEY_LENGTH]>::try_from(bytes.as_slice())
            .map_err(|_| PairkitError::InvalidKey("stored private key has wrong length".into()))?;
        Ok(StaticSecret::from(array))
    }

    pub async fn delete_private_key(&self, public_key: &PublicKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage
            .delete_if_exists(&private_key_id(public_key))
            .await?;
        Ok(())
    }

    /// Derive the shared key between one of our keypairs and a peer public
    /// key. Both peers obtain the same key whichever side computes it.
    pub async fn agree_symmetric_key(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<AgreementKeys> {
        let secret = self.get_private_key(self_public_key).await?;
        let shared_key = derive_shared_key(&secret, peer_public_key)?;
        Ok(AgreementKeys {
            shared_key,
            public_key: *self_public_key,
        })
    }

    /// Agree a key with a peer, derive its topic and store the key under it.
    pub async fn perform_key_agreement(
        &self,
        self_public_key: &PublicKey,
        peer_public_key: &PublicKey,
    ) -> Result<(Topic, AgreementKeys)> {
        let agreement = self
            .agree_symmetric_key(self_public_key, peer_public_key)
            .await?;
        let topic = derive_topic(&agreement.shared_key);
        self.set_symmetric_key(&agreement.shared_key, &topic).await?;
        Ok((topic, agreement))
    }

    /// Generate a random symmetric key and store it under its own topic.
    pub async fn create_symmetric_key(&self) -> Result<(Topic, SymmetricKey)> {
        let key = SymmetricKey::generate();
        let topic = derive_topic(&key);
        self.set_symmetric_key(&key, &topic).await?;
        Ok((topic, key))
    }

    /// Store `key` as the one key of `topic`, replacing any previous key.
    pub async fn set_symmetric_key(&self, key: &SymmetricKey, topic: &Topic) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage
            .store(
                &symmetric_key_id(topic),
                key.as_bytes(),
                StoreOptions::new().overwrite(),
            )
            .await?;
        Ok(())
    }

    /// Look up the symmetric key of a topic.
    ///
    /// # Errors
    /// `KeyNotFound` if no key was ever stored for the topic or it was deleted.
    pub async fn get_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey> {
        let id = symmetric_key_id(topic);
        let bytes = self
            .storage
            .retrieve(&id)
            .await?
            .ok_or(PairkitError::KeyNotFound(id))?;
        SymmetricKey::from_slice(&bytes)
    }

    pub async fn has_symmetric_key(&self, topic: &Topic) -> Result<bool> {
        Ok(self.storage.exists(&symmetric_key_id(topic)).await?)
    }

    pub async fn delete_symmetric_key(&self, topic: &Topic) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage
            .delete_if_exists(&symmetric_key_id(topic))
            .await?;
        Ok(())
    }

    /// Register one of our public keys as the receiver of type-1 envelopes on
    /// `topic`.
    pub async fn set_public_key(&self, public_key: &PublicKey, topic: &Topic) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage
            .store(
                &public_key_id(topic),
                public_key.as_bytes(),
                StoreOptions::new().overwrite(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_public_key(&self, topic: &Topic) -> Result<PublicKey> {
        let id = public_key_id(topic);
        let bytes = self
            .storage
            .retrieve(&id)
            .await?
            .ok_or(PairkitError::KeyNotFound(id))?;
        let array = <[u8; KEY_LENGTH]>::try_from(bytes.as_slice())
            .map_err(|_| PairkitError::InvalidKey("stored public key has wrong length".into()))?;
        Ok(PublicKey::from_bytes(array))
    }

    pub async fn delete_public_key(&self, topic: &Topic) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.delete_if_exists(&public_key_id(topic)).await?;
        Ok(())
    }
}
