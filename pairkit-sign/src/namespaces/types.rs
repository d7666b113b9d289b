use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace maps keyed by `namespace` or `namespace:reference`.
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;
pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;
pub type SessionProperties = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} identifier: {value}")]
pub struct ParseIdentifierError {
    kind: &'static str,
    value: String,
}

fn is_valid_namespace(s: &str) -> bool {
    (3..=8).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_valid_reference(s: &str) -> bool {
    (1..=32).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn is_valid_address(s: &str) -> bool {
    (1..=128).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'%')
}

/// A CAIP-2 chain id, `namespace:reference`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Blockchain {
    namespace: String,
    reference: String,
}

impl Blockchain {
    pub fn new(namespace: &str, reference: &str) -> Result<Self, ParseIdentifierError> {
        if !is_valid_namespace(namespace) || !is_valid_reference(reference) {
            return Err(ParseIdentifierError {
                kind: "chain",
                value: format!("{}:{}", namespace, reference),
            });
        }
        Ok(Self {
            namespace: namespace.to_string(),
            reference: reference.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl FromStr for Blockchain {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or_else(|| ParseIdentifierError {
            kind: "chain",
            value: s.to_string(),
        })?;
        Self::new(namespace, reference)
    }
}

impl TryFrom<String> for Blockchain {
    type Error = ParseIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Blockchain> for String {
    fn from(chain: Blockchain) -> Self {
        chain.to_string()
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// A CAIP-10 account id, `namespace:reference:address`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account {
    chain: Blockchain,
    address: String,
}

impl Account {
    pub fn new(chain: Blockchain, address: &str) -> Result<Self, ParseIdentifierError> {
        if !is_valid_address(address) {
            return Err(ParseIdentifierError {
                kind: "account",
                value: format!("{}:{}", chain, address),
            });
        }
        Ok(Self {
            chain,
            address: address.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        self.chain.namespace()
    }

    pub fn reference(&self) -> &str {
        self.chain.reference()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.chain
    }
}

impl FromStr for Account {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseIdentifierError {
            kind: "account",
            value: s.to_string(),
        };
        let mut parts = s.splitn(3, ':');
        let (Some(namespace), Some(reference), Some(address)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let chain = Blockchain::new(namespace, reference).map_err(|_| invalid())?;
        Self::new(chain, address)
    }
}

impl TryFrom<String> for Account {
    type Error = ParseIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.to_string()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// Capabilities a proposer asks for under one namespace key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<Blockchain>>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Capabilities granted under one namespace key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<Blockchain>>,
    pub accounts: Vec<Account>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl SessionNamespace {
    /// Whether this grant applies to `chain`, through an account or the
    /// declared chain list.
    pub fn covers_chain(&self, chain: &Blockchain) -> bool {
        self.accounts.iter().any(|a| a.blockchain() == chain)
            || self
                .chains
                .as_ref()
                .is_some_and(|chains| chains.contains(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifiers() {
        let chain: Blockchain = "eip155:137".parse().unwrap();
        assert_eq!(chain.namespace(), "eip155");
        assert_eq!(chain.reference(), "137");

        let account: Account = "eip155:1:0xAbC".parse().unwrap();
        assert_eq!(account.blockchain(), &"eip155:1".parse::<Blockchain>().unwrap());
        assert_eq!(account.address(), "0xAbC");
        assert_eq!(account.to_string(), "eip155:1:0xAbC");

        let solana: Blockchain = "solana:4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZ".parse().unwrap();
        assert_eq!(solana.reference().len(), 32);
    }

    #[test]
    fn test_reject_bad_identifiers() {
        for chain in ["eip155", "EIP155:1", "ab:1", "eip155:", "toolongnamespace:1", "eip155:1!"] {
            assert!(chain.parse::<Blockchain>().is_err(), "{} should fail", chain);
        }
        for account in ["eip155:1", "eip155:1:", "eip155:1:0x:1", "eip155:1:has space"] {
            assert!(account.parse::<Account>().is_err(), "{} should fail", account);
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let namespace = SessionNamespace {
            chains: None,
            accounts: vec!["eip155:1:0xabc".parse().unwrap()],
            methods: vec!["eth_sign".into()],
            events: vec![],
        };
        let json = serde_json::to_value(&namespace).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"accounts": ["eip155:1:0xabc"], "methods": ["eth_sign"], "events": []})
        );
        assert_eq!(serde_json::from_value::<SessionNamespace>(json).unwrap(), namespace);

        assert!(serde_json::from_value::<Blockchain>(serde_json::json!("nope")).is_err());
    }
}
