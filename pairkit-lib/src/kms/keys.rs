//! Key material types.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::PairkitError;
use crate::Result;

/// Length of every key handled by the KMS.
pub const KEY_LENGTH: usize = 32;

fn decode_key_hex(hex_str: &str, what: &str) -> Result<[u8; KEY_LENGTH]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| PairkitError::InvalidKey(format!("{} is not hex: {}", what, e)))?;
    <[u8; KEY_LENGTH]>::try_from(bytes.as_slice()).map_err(|_| {
        PairkitError::InvalidKey(format!(
            "{} must be {} bytes, got {}",
            what,
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

/// An x25519 public key, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        decode_key_hex(hex_str, "public key").map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl TryFrom<String> for PublicKey {
    type Error = PairkitError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        Self(x25519_dalek::PublicKey::from(secret).to_bytes())
    }
}

/// A 32-byte ChaCha20-Poly1305 key. Wiped on drop; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    /// Generate a random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; KEY_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| {
                PairkitError::InvalidKey(format!(
                    "symmetric key must be {} bytes, got {}",
                    KEY_LENGTH,
                    bytes.len()
                ))
            })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        decode_key_hex(hex_str, "symmetric key").map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Result of an x25519 agreement: the derived key plus the local public key
/// that took part in it.
#[derive(Clone, Debug)]
pub struct AgreementKeys {
    pub shared_key: SymmetricKey,
    pub public_key: PublicKey,
}

/// x25519 then HKDF-SHA256 with empty salt and info.
pub(crate) fn derive_shared_key(secret: &StaticSecret, peer: &PublicKey) -> Result<SymmetricKey> {
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(*peer.as_bytes()));
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(&[], &mut okm)
        .map_err(|e| PairkitError::Internal(format!("key derivation failed: {}", e)))?;
    let key = SymmetricKey(okm);
    okm.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_hex_roundtrip() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let parsed = PublicKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(parsed, public);

        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{}\"", public.to_hex()));
    }

    #[test]
    fn test_invalid_key_lengths() {
        assert!(matches!(
            PublicKey::from_hex("abcd"),
            Err(PairkitError::InvalidKey(_))
        ));
        assert!(matches!(
            SymmetricKey::from_hex("zz"),
            Err(PairkitError::InvalidKey(_))
        ));
        assert!(SymmetricKey::from_slice(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_symmetric_key_debug_is_redacted() {
        let key = SymmetricKey::from_bytes([0xab; KEY_LENGTH]);
        assert!(!format!("{:?}", key).contains("ab"));
    }

    #[test]
    fn test_shared_key_is_order_independent() {
        let a = StaticSecret::random_from_rng(OsRng);
        let b = StaticSecret::random_from_rng(OsRng);

        let ab = derive_shared_key(&a, &PublicKey::from(&b)).unwrap();
        let ba = derive_shared_key(&b, &PublicKey::from(&a)).unwrap();
        assert_eq!(ab, ba);
    }
}
