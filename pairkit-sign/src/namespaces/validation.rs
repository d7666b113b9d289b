//! Structural checks on proposal and session namespace maps.

use super::errors::UnsupportedNamespace;
use super::types::{Blockchain, ProposalNamespace, ProposalNamespaces, SessionNamespaces, SessionProperties};
use super::{ordered_union, union_optional};
use crate::SignError;

/// Check that each proposal key and its chain list agree.
///
/// A `namespace:reference` key must not list chains; a bare key must list at
/// least one chain, all in that namespace.
pub fn validate_proposal(namespaces: &ProposalNamespaces) -> Result<(), UnsupportedNamespace> {
    for (key, namespace) in namespaces {
        match key.split_once(':') {
            Some((_, reference)) => {
                if reference.is_empty() {
                    return Err(UnsupportedNamespace::Chains {
                        key: key.clone(),
                        detail: "empty chain reference".into(),
                    });
                }
                if namespace.chains.is_some() {
                    return Err(UnsupportedNamespace::Chains {
                        key: key.clone(),
                        detail: "chain-specific key must not list chains".into(),
                    });
                }
            }
            None => {
                let chains = match &namespace.chains {
                    Some(chains) if !chains.is_empty() => chains,
                    _ => {
                        return Err(UnsupportedNamespace::Chains {
                            key: key.clone(),
                            detail: "no chains listed".into(),
                        })
                    }
                };
                if let Some(chain) = chains.iter().find(|chain| chain.namespace() != key.as_str()) {
                    return Err(UnsupportedNamespace::Chains {
                        key: key.clone(),
                        detail: format!("{} is outside the namespace", chain),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Check that every session namespace has accounts, all under its key.
pub fn validate_session(namespaces: &SessionNamespaces) -> Result<(), UnsupportedNamespace> {
    for (key, namespace) in namespaces {
        if namespace.accounts.is_empty() {
            return Err(UnsupportedNamespace::Accounts {
                key: key.clone(),
                detail: "no accounts".into(),
            });
        }
        let chain_specific = key.contains(':');
        for account in &namespace.accounts {
            let matches = if chain_specific {
                account.blockchain().to_string() == *key
            } else {
                account.namespace() == key.as_str()
            };
            if !matches {
                return Err(UnsupportedNamespace::Accounts {
                    key: key.clone(),
                    detail: format!("{} does not belong to the namespace", account),
                });
            }
        }
    }
    Ok(())
}

/// Normalize a proposal so every entry carries its chains: chain-specific
/// keys fold into their network key. Entries landing on the same key merge.
fn required_view(proposal: &ProposalNamespaces) -> Result<ProposalNamespaces, UnsupportedNamespace> {
    let mut required = ProposalNamespaces::new();
    for (key, namespace) in proposal {
        let (target, normalized) = if namespace.chains.is_some() {
            (key.clone(), namespace.clone())
        } else {
            let chain = key.parse::<Blockchain>().map_err(|_| UnsupportedNamespace::Chains {
                key: key.clone(),
                detail: "no chains listed".into(),
            })?;
            (
                chain.namespace().to_string(),
                ProposalNamespace {
                    chains: Some(vec![chain]),
                    methods: namespace.methods.clone(),
                    events: namespace.events.clone(),
                },
            )
        };

        let merged = match required.remove(&target) {
            Some(existing) => ProposalNamespace {
                chains: union_optional(existing.chains.as_ref(), normalized.chains.as_ref()),
                methods: ordered_union(&existing.methods, &normalized.methods),
                events: ordered_union(&existing.events, &normalized.events),
            },
            None => normalized,
        };
        required.insert(target, merged);
    }
    Ok(required)
}

/// Check that a session grant covers everything a proposal required.
///
/// Comparison is by containment: every required method and event must be
/// granted under the same key, and every required chain must have an account.
pub fn validate_approved(
    session: &SessionNamespaces,
    proposal: &ProposalNamespaces,
) -> Result<(), UnsupportedNamespace> {
    for (key, required) in required_view(proposal)? {
        let approved = session
            .get(&key)
            .ok_or_else(|| UnsupportedNamespace::NamespaceKey { key: key.clone() })?;

        if let Some(method) = required.methods.iter().find(|m| !approved.methods.contains(m)) {
            return Err(UnsupportedNamespace::Methods {
                key,
                method: method.clone(),
            });
        }
        if let Some(event) = required.events.iter().find(|e| !approved.events.contains(e)) {
            return Err(UnsupportedNamespace::Events {
                key,
                event: event.clone(),
            });
        }
        for chain in required.chains.iter().flatten() {
            if !approved.accounts.iter().any(|a| a.blockchain() == chain) {
                return Err(UnsupportedNamespace::Accounts {
                    key,
                    detail: format!("no account for {}", chain),
                });
            }
        }
    }
    Ok(())
}

/// Session properties, when sent, must not be empty.
pub fn validate_session_properties(properties: Option<&SessionProperties>) -> Result<(), SignError> {
    match properties {
        Some(properties) if properties.is_empty() => Err(SignError::EmptySessionProperties),
        _ => Ok(()),
    }
}
