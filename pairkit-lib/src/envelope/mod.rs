//! Topic derivation and the encrypted envelope codec.
//!
//! # Wire Format
//!
//! ```text
//! base64( [1 byte type][32 bytes sender public key, type 1 only][12 bytes nonce][N bytes ciphertext][16 bytes tag] )
//! ```
//!
//! Type 0 envelopes are sealed with the symmetric key of the topic they are
//! published on. Type 1 envelopes embed the sender's x25519 public key so a
//! receiver that only knows its own keypair can agree the key on arrival.
//! Both use ChaCha20-Poly1305 with a random 96-bit nonce.

mod serializer;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::PairkitError;
use crate::kms::{PublicKey, SymmetricKey, KEY_LENGTH};
use crate::{Result, Topic};

pub use serializer::{EnvelopeKind, EnvelopeSerializer};

/// Type byte of symmetric-key envelopes.
pub const TYPE_0: u8 = 0;

/// Type byte of envelopes carrying the sender public key.
pub const TYPE_1: u8 = 1;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Derive the relay topic of a symmetric key: hex of its SHA-256 digest.
pub fn derive_topic(key: &SymmetricKey) -> Topic {
    topic_from_bytes(key.as_bytes())
}

/// Topic on which a keypair receives type-1 envelopes addressed to it.
pub fn derive_topic_for_public_key(public_key: &PublicKey) -> Topic {
    topic_from_bytes(public_key.as_bytes())
}

fn topic_from_bytes(bytes: &[u8]) -> Topic {
    Topic::new(hex::encode(Sha256::digest(bytes)))
}

/// Envelope type and its type-specific header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    Type0,
    Type1 { sender_public_key: PublicKey },
}

impl EnvelopeType {
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Type0 => TYPE_0,
            Self::Type1 { .. } => TYPE_1,
        }
    }
}

/// A sealed message as transmitted over a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub envelope_type: EnvelopeType,
    /// `nonce ++ ciphertext ++ tag`
    pub sealbox: Vec<u8>,
}

impl Envelope {
    /// Encrypt `plaintext` with `key`. Passing a sender public key produces a
    /// type-1 envelope.
    pub fn seal(
        plaintext: &[u8],
        key: &SymmetricKey,
        sender_public_key: Option<PublicKey>,
    ) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| PairkitError::Internal(format!("cipher init failed: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| PairkitError::Internal(format!("encryption failed: {}", e)))?;

        let mut sealbox = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealbox.extend_from_slice(&nonce_bytes);
        sealbox.extend_from_slice(&ciphertext);

        let envelope_type = match sender_public_key {
            Some(sender_public_key) => EnvelopeType::Type1 { sender_public_key },
            None => EnvelopeType::Type0,
        };
        Ok(Self {
            envelope_type,
            sealbox,
        })
    }

    /// Decrypt with `key`.
    ///
    /// # Errors
    /// `DecryptionFailed` on a short sealbox or an authentication failure
    /// (wrong key or tampered bytes).
    pub fn open(&self, key: &SymmetricKey) -> Result<Vec<u8>> {
        if self.sealbox.len() < NONCE_SIZE + TAG_SIZE {
            return Err(PairkitError::decryption(format!(
                "sealbox too short: {} bytes",
                self.sealbox.len()
            )));
        }
        let (nonce, ciphertext) = self.sealbox.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| PairkitError::Internal(format!("cipher init failed: {}", e)))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PairkitError::decryption("authentication failed"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH + self.sealbox.len());
        out.push(self.envelope_type.type_byte());
        if let EnvelopeType::Type1 { sender_public_key } = &self.envelope_type {
            out.extend_from_slice(sender_public_key.as_bytes());
        }
        out.extend_from_slice(&self.sealbox);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&type_byte, rest) = bytes
            .split_first()
            .ok_or_else(|| PairkitError::decryption("empty envelope"))?;

        let (envelope_type, sealbox) = match type_byte {
            TYPE_0 => (EnvelopeType::Type0, rest),
            TYPE_1 => {
                if rest.len() < KEY_LENGTH {
                    return Err(PairkitError::decryption(
                        "type 1 envelope too short for sender key",
                    ));
                }
                let (key_bytes, sealbox) = rest.split_at(KEY_LENGTH);
                let mut key = [0u8; KEY_LENGTH];
                key.copy_from_slice(key_bytes);
                (
                    EnvelopeType::Type1 {
                        sender_public_key: PublicKey::from_bytes(key),
                    },
                    sealbox,
                )
            }
            other => {
                return Err(PairkitError::decryption(format!(
                    "unknown envelope type {}",
                    other
                )))
            }
        };

        if sealbox.len() < NONCE_SIZE + TAG_SIZE {
            return Err(PairkitError::decryption(format!(
                "sealbox too short: {} bytes",
                sealbox.len()
            )));
        }

        Ok(Self {
            envelope_type,
            sealbox: sealbox.to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| PairkitError::decryption(format!("invalid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SymmetricKey::generate();
        let plaintext = br#"{"id":1,"jsonrpc":"2.0","method":"wc_pairingPing","params":{}}"#;

        let envelope = Envelope::seal(plaintext, &key, None).unwrap();
        let decoded = Envelope::from_base64(&envelope.to_base64()).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.open(&key).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn test_wire_layout() {
        let key = SymmetricKey::generate();
        let sender = PublicKey::from_bytes([7u8; KEY_LENGTH]);

        let type0 = Envelope::seal(b"hello", &key, None).unwrap().to_bytes();
        assert_eq!(type0[0], TYPE_0);
        assert_eq!(type0.len(), 1 + NONCE_SIZE + 5 + TAG_SIZE);

        let type1 = Envelope::seal(b"hello", &key, Some(sender)).unwrap().to_bytes();
        assert_eq!(type1[0], TYPE_1);
        assert_eq!(&type1[1..1 + KEY_LENGTH], sender.as_bytes());
        assert_eq!(type1.len(), 1 + KEY_LENGTH + NONCE_SIZE + 5 + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = Envelope::seal(b"secret", &SymmetricKey::generate(), None).unwrap();
        let result = envelope.open(&SymmetricKey::generate());
        assert!(matches!(result, Err(PairkitError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = SymmetricKey::generate();
        let mut envelope = Envelope::seal(b"secret", &key, None).unwrap();
        let last = envelope.sealbox.len() - 1;
        envelope.sealbox[last] ^= 0xff;
        assert!(matches!(
            envelope.open(&key),
            Err(PairkitError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_malformed_envelopes() {
        assert!(Envelope::from_bytes(&[]).is_err());
        assert!(Envelope::from_bytes(&[TYPE_0, 1, 2, 3]).is_err());
        assert!(Envelope::from_bytes(&[TYPE_1; 20]).is_err());
        assert!(Envelope::from_bytes(&[9u8; 64]).is_err());
        assert!(matches!(
            Envelope::from_base64("not base64!"),
            Err(PairkitError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_derive_topic_is_deterministic() {
        let key = SymmetricKey::from_bytes([3u8; KEY_LENGTH]);
        let topic = derive_topic(&key);

        assert_eq!(topic, derive_topic(&key.clone()));
        assert_eq!(topic.as_str().len(), 64);
        assert_ne!(
            topic,
            derive_topic(&SymmetricKey::from_bytes([4u8; KEY_LENGTH]))
        );
    }
}
