//! Fixtures shared by unit and integration tests.

use rand::RngCore;

use crate::pairing::AppMetadata;
use crate::Topic;

/// A random 64-hex-character topic.
pub fn random_topic() -> Topic {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Topic::new(hex::encode(bytes))
}

/// A deterministic topic made of one repeated byte.
pub fn topic_from_byte(byte: u8) -> Topic {
    Topic::new(hex::encode([byte; 32]))
}

/// Metadata for a named test peer.
pub fn test_metadata(name: &str) -> AppMetadata {
    AppMetadata {
        name: name.to_string(),
        description: format!("{} test peer", name),
        url: format!("https://{}.example", name.to_lowercase()),
        icons: vec![],
    }
}
