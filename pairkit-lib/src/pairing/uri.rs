//! Pairing URI parsing and formatting.
//!
//! ```text
//! wc:{topic}@{version}?relay-protocol={proto}[&relay-data={data}]&symKey={hex}[&expiryTimestamp={unix}]
//! ```

use std::fmt;
use std::str::FromStr;

use super::types::RelayProtocolOptions;
use crate::errors::PairkitError;
use crate::kms::SymmetricKey;
use crate::{Result, Topic};

pub const PAIRING_URI_VERSION: u32 = 2;

/// Everything a peer needs to join a pairing topic.
#[derive(Clone, Debug, PartialEq)]
pub struct PairingUri {
    pub topic: Topic,
    pub version: u32,
    pub sym_key: SymmetricKey,
    pub relay: RelayProtocolOptions,
    /// Unix seconds after which the URI should no longer be used.
    pub expiry_timestamp: Option<i64>,
}

impl PairingUri {
    pub fn new(topic: Topic, sym_key: SymmetricKey, relay: RelayProtocolOptions) -> Self {
        Self {
            topic,
            version: PAIRING_URI_VERSION,
            sym_key,
            relay,
            expiry_timestamp: None,
        }
    }

    pub fn with_expiry(mut self, expiry_timestamp: i64) -> Self {
        self.expiry_timestamp = Some(expiry_timestamp);
        self
    }

    /// Parse a `wc:` pairing URI.
    ///
    /// # Errors
    /// `InvalidUri` for a wrong scheme, a missing topic, version,
    /// `relay-protocol` or `symKey`, or a key that is not 32 hex bytes.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let rest = uri
            .strip_prefix("wc:")
            .ok_or_else(|| invalid("missing wc: scheme"))?;
        // Some producers emit `wc://`.
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| invalid("missing query"))?;
        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| invalid("missing version"))?;
        if topic.is_empty() {
            return Err(invalid("empty topic"));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| invalid(format!("bad version {}", version)))?;

        let mut protocol = None;
        let mut data = None;
        let mut sym_key = None;
        let mut expiry_timestamp = None;

        for param in query.split('&') {
            if let Some((key, value)) = param.split_once('=') {
                match key {
                    "relay-protocol" => protocol = Some(url_decode(value)?),
                    "relay-data" => data = Some(url_decode(value)?),
                    "symKey" => {
                        sym_key = Some(
                            SymmetricKey::from_hex(value)
                                .map_err(|_| invalid("symKey is not a 32-byte hex key"))?,
                        )
                    }
                    "expiryTimestamp" => {
                        expiry_timestamp = Some(
                            value
                                .parse::<i64>()
                                .map_err(|_| invalid("bad expiryTimestamp"))?,
                        )
                    }
                    _ => {
                        // Unknown parameters are ignored
                    }
                }
            }
        }

        let protocol = protocol.ok_or_else(|| invalid("missing relay-protocol"))?;
        let sym_key = sym_key.ok_or_else(|| invalid("missing symKey"))?;

        Ok(Self {
            topic: Topic::new(topic),
            version,
            sym_key,
            relay: RelayProtocolOptions { protocol, data },
            expiry_timestamp,
        })
    }
}

impl FromStr for PairingUri {
    type Err = PairkitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wc:{}@{}?relay-protocol={}",
            self.topic,
            self.version,
            url_encode(&self.relay.protocol)
        )?;
        if let Some(data) = &self.relay.data {
            write!(f, "&relay-data={}", url_encode(data))?;
        }
        write!(f, "&symKey={}", self.sym_key.to_hex())?;
        if let Some(expiry) = self.expiry_timestamp {
            write!(f, "&expiryTimestamp={}", expiry)?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> PairkitError {
    PairkitError::InvalidUri(message.into())
}

fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn url_decode(encoded: &str) -> Result<String> {
    let mut decoded = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.bytes();

    while let Some(byte) = bytes.next() {
        match byte {
            b'%' => {
                let hi = bytes.next().ok_or_else(|| invalid("incomplete percent encoding"))?;
                let lo = bytes.next().ok_or_else(|| invalid("incomplete percent encoding"))?;
                let pair = [hi, lo];
                let hex = std::str::from_utf8(&pair)
                    .map_err(|_| invalid("invalid hex in percent encoding"))?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| invalid("invalid hex in percent encoding"))?;
                decoded.push(value);
            }
            b'+' => decoded.push(b' '),
            other => decoded.push(other),
        }
    }

    String::from_utf8(decoded).map_err(|_| invalid("percent encoding is not utf-8"))
}
