//! JSON serialization through the envelope codec, with keys resolved by the
//! KMS.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use super::{Envelope, EnvelopeType};
use crate::kms::{derive_shared_key, KeyManagementService, PublicKey};
use crate::{Result, Topic};

/// How an outbound payload is sealed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Sealed with the topic's stored symmetric key.
    Symmetric,
    /// Sealed with a key agreed between one of our keypairs and the
    /// receiver's public key; our public key travels in the envelope.
    Agreement {
        sender_public_key: PublicKey,
        receiver_public_key: PublicKey,
    },
}

/// Seals and opens JSON payloads for a topic.
#[derive(Clone)]
pub struct EnvelopeSerializer {
    kms: Arc<KeyManagementService>,
}

impl EnvelopeSerializer {
    pub fn new(kms: Arc<KeyManagementService>) -> Self {
        Self { kms }
    }

    /// Serialize `value` to JSON and seal it for `topic`.
    pub async fn serialize<T: Serialize>(
        &self,
        topic: &Topic,
        value: &T,
        kind: EnvelopeKind,
    ) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;
        let envelope = match kind {
            EnvelopeKind::Symmetric => {
                let key = self.kms.get_symmetric_key(topic).await?;
                Envelope::seal(&plaintext, &key, None)?
            }
            EnvelopeKind::Agreement {
                sender_public_key,
                receiver_public_key,
            } => {
                let agreement = self
                    .kms
                    .agree_symmetric_key(&sender_public_key, &receiver_public_key)
                    .await?;
                Envelope::seal(&plaintext, &agreement.shared_key, Some(sender_public_key))?
            }
        };
        Ok(envelope.to_base64())
    }

    /// Open an envelope received on `topic` and deserialize its JSON.
    ///
    /// Returns the embedded sender public key for type-1 envelopes.
    pub async fn deserialize<T: DeserializeOwned>(
        &self,
        topic: &Topic,
        encoded: &str,
    ) -> Result<(T, Option<PublicKey>)> {
        let envelope = Envelope::from_base64(encoded)?;
        let (plaintext, sender) = match envelope.envelope_type {
            EnvelopeType::Type0 => {
                let key = self.kms.get_symmetric_key(topic).await?;
                (envelope.open(&key)?, None)
            }
            EnvelopeType::Type1 { sender_public_key } => {
                let receiver = self.kms.get_public_key(topic).await?;
                let secret = self.kms.get_private_key(&receiver).await?;
                let key = derive_shared_key(&secret, &sender_public_key)?;
                (envelope.open(&key)?, Some(sender_public_key))
            }
        };
        Ok((serde_json::from_slice(&plaintext)?, sender))
    }
}
