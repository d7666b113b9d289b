//! Building session namespaces from a wallet's declared capabilities.

use std::collections::HashSet;

use super::errors::AutoNamespacesError;
use super::types::{Account, Blockchain, ProposalNamespace, ProposalNamespaces, SessionNamespace, SessionNamespaces};
use super::{ordered_union, union_optional};

struct Supported<'a> {
    chains: HashSet<&'a Blockchain>,
    methods: HashSet<&'a str>,
    events: HashSet<&'a str>,
    accounts: &'a [Account],
}

/// Grant everything the wallet supports out of what a proposal asks for.
///
/// Required entries must be satisfiable in full, or the whole build fails.
/// Optional entries are granted where they overlap the wallet's support and
/// skipped otherwise. Chain-specific keys (`eip155:1`) are granted under
/// their network key; entries landing on the same key are merged.
pub fn build_auto(
    required: &ProposalNamespaces,
    optional: Option<&ProposalNamespaces>,
    chains: &[Blockchain],
    methods: &[String],
    events: &[String],
    accounts: &[Account],
) -> Result<SessionNamespaces, AutoNamespacesError> {
    let supported = Supported {
        chains: chains.iter().collect(),
        methods: methods.iter().map(String::as_str).collect(),
        events: events.iter().map(String::as_str).collect(),
        accounts,
    };

    let mut granted = SessionNamespaces::new();
    for (key, namespace) in required {
        extend(&mut granted, key, namespace, true, &supported)?;
    }
    for (key, namespace) in optional.into_iter().flatten() {
        extend(&mut granted, key, namespace, false, &supported)?;
    }
    Ok(granted)
}

fn extend(
    granted: &mut SessionNamespaces,
    key: &str,
    namespace: &ProposalNamespace,
    required: bool,
    supported: &Supported<'_>,
) -> Result<(), AutoNamespacesError> {
    let (target, proposal_chains) = match &namespace.chains {
        Some(chains) => (key.to_string(), chains.clone()),
        None => match key.parse::<Blockchain>() {
            Ok(chain) => (chain.namespace().to_string(), vec![chain]),
            Err(_) => {
                tracing::debug!(key, "namespace key without chains skipped");
                return Ok(());
            }
        },
    };

    let Some(entry) = grant(key, namespace, &proposal_chains, required, supported)? else {
        return Ok(());
    };

    let merged = match granted.remove(&target) {
        Some(existing) => SessionNamespace {
            chains: union_optional(existing.chains.as_ref(), entry.chains.as_ref()),
            accounts: ordered_union(&existing.accounts, &entry.accounts),
            methods: ordered_union(&existing.methods, &entry.methods),
            events: ordered_union(&existing.events, &entry.events),
        },
        None => entry,
    };
    granted.insert(target, merged);
    Ok(())
}

fn grant(
    key: &str,
    namespace: &ProposalNamespace,
    proposal_chains: &[Blockchain],
    required: bool,
    supported: &Supported<'_>,
) -> Result<Option<SessionNamespace>, AutoNamespacesError> {
    let chains: Vec<Blockchain> = proposal_chains
        .iter()
        .filter(|chain| supported.chains.contains(chain))
        .cloned()
        .collect();
    if chains.is_empty() {
        if required {
            return Err(AutoNamespacesError::RequiredChainsNotSatisfied { key: key.to_string() });
        }
        return Ok(None);
    }

    let (methods, missing_methods) = partition(&namespace.methods, &supported.methods);
    if required && !missing_methods.is_empty() {
        return Err(AutoNamespacesError::RequiredMethodsNotSatisfied {
            key: key.to_string(),
            methods: missing_methods,
        });
    }
    if !required && methods.is_empty() {
        return Ok(None);
    }

    let (events, missing_events) = partition(&namespace.events, &supported.events);
    if required && !missing_events.is_empty() {
        return Err(AutoNamespacesError::RequiredEventsNotSatisfied {
            key: key.to_string(),
            events: missing_events,
        });
    }

    let accounts: Vec<Account> = supported
        .accounts
        .iter()
        .filter(|account| chains.contains(account.blockchain()))
        .cloned()
        .collect();
    if required && accounts.is_empty() {
        return Err(AutoNamespacesError::RequiredAccountsNotSatisfied { key: key.to_string() });
    }

    Ok(Some(SessionNamespace {
        chains: Some(chains),
        accounts,
        methods,
        events,
    }))
}

/// Split `requested` into (supported, unsupported), keeping order.
fn partition(requested: &[String], supported: &HashSet<&str>) -> (Vec<String>, Vec<String>) {
    requested
        .iter()
        .cloned()
        .partition(|item| supported.contains(item.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chains(ids: &[&str]) -> Vec<Blockchain> {
        ids.iter().map(|id| id.parse().unwrap()).collect()
    }

    fn accounts(ids: &[&str]) -> Vec<Account> {
        ids.iter().map(|id| id.parse().unwrap()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn eip155_proposal() -> ProposalNamespaces {
        let mut required = ProposalNamespaces::new();
        required.insert(
            "eip155".into(),
            ProposalNamespace {
                chains: Some(chains(&["eip155:1", "eip155:137"])),
                methods: strings(&["eth_sign"]),
                events: strings(&["accountsChanged"]),
            },
        );
        required
    }

    #[test]
    fn test_grants_supported_subset() {
        let granted = build_auto(
            &eip155_proposal(),
            None,
            &chains(&["eip155:1"]),
            &strings(&["eth_sign"]),
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:1:0xABC"]),
        )
        .unwrap();

        assert_eq!(granted.len(), 1);
        assert_eq!(
            granted["eip155"],
            SessionNamespace {
                chains: Some(chains(&["eip155:1"])),
                accounts: accounts(&["eip155:1:0xABC"]),
                methods: strings(&["eth_sign"]),
                events: strings(&["accountsChanged"]),
            }
        );
    }

    #[test]
    fn test_required_without_chain_overlap_fails() {
        let err = build_auto(
            &eip155_proposal(),
            None,
            &chains(&["eip155:10"]),
            &strings(&["eth_sign"]),
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:10:0xABC"]),
        )
        .unwrap_err();
        assert_eq!(err, AutoNamespacesError::RequiredChainsNotSatisfied { key: "eip155".into() });
    }

    #[test]
    fn test_required_shortfalls() {
        let supported_chains = chains(&["eip155:1"]);

        let err = build_auto(
            &eip155_proposal(),
            None,
            &supported_chains,
            &[],
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:1:0xABC"]),
        )
        .unwrap_err();
        assert!(matches!(err, AutoNamespacesError::RequiredMethodsNotSatisfied { methods, .. } if methods == ["eth_sign"]));

        let err = build_auto(
            &eip155_proposal(),
            None,
            &supported_chains,
            &strings(&["eth_sign"]),
            &[],
            &accounts(&["eip155:1:0xABC"]),
        )
        .unwrap_err();
        assert!(matches!(err, AutoNamespacesError::RequiredEventsNotSatisfied { .. }));

        let err = build_auto(
            &eip155_proposal(),
            None,
            &supported_chains,
            &strings(&["eth_sign"]),
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:137:0xABC"]),
        )
        .unwrap_err();
        assert!(matches!(err, AutoNamespacesError::RequiredAccountsNotSatisfied { .. }));
    }

    #[test]
    fn test_optional_entries_are_skipped_or_merged() {
        let mut optional = ProposalNamespaces::new();
        optional.insert(
            "eip155:10".into(),
            ProposalNamespace {
                chains: None,
                methods: strings(&["personal_sign"]),
                events: vec![],
            },
        );
        optional.insert(
            "cosmos".into(),
            ProposalNamespace {
                chains: Some(chains(&["cosmos:cosmoshub-4"])),
                methods: strings(&["cosmos_signDirect"]),
                events: vec![],
            },
        );

        let granted = build_auto(
            &eip155_proposal(),
            Some(&optional),
            &chains(&["eip155:1", "eip155:10"]),
            &strings(&["eth_sign", "personal_sign"]),
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:1:0xABC", "eip155:10:0xABC"]),
        )
        .unwrap();

        // cosmos is unsupported and optional, so it is simply absent.
        assert_eq!(granted.keys().collect::<Vec<_>>(), vec!["eip155"]);
        let eip155 = &granted["eip155"];
        assert_eq!(eip155.chains, Some(chains(&["eip155:1", "eip155:10"])));
        assert_eq!(eip155.accounts, accounts(&["eip155:1:0xABC", "eip155:10:0xABC"]));
        assert_eq!(eip155.methods, strings(&["eth_sign", "personal_sign"]));
        assert_eq!(eip155.events, strings(&["accountsChanged"]));
    }

    #[test]
    fn test_optional_without_supported_methods_is_skipped() {
        let mut optional = ProposalNamespaces::new();
        optional.insert(
            "eip155:10".into(),
            ProposalNamespace {
                chains: None,
                methods: strings(&["eth_signTypedData"]),
                events: vec![],
            },
        );
        let granted = build_auto(
            &ProposalNamespaces::new(),
            Some(&optional),
            &chains(&["eip155:10"]),
            &strings(&["eth_sign"]),
            &[],
            &accounts(&["eip155:10:0xABC"]),
        )
        .unwrap();
        assert!(granted.is_empty());
    }

    #[test]
    fn test_granted_namespaces_pass_validation() {
        let proposal = eip155_proposal();
        let granted = build_auto(
            &proposal,
            None,
            &chains(&["eip155:1", "eip155:137"]),
            &strings(&["eth_sign"]),
            &strings(&["accountsChanged"]),
            &accounts(&["eip155:1:0xABC", "eip155:137:0xABC"]),
        )
        .unwrap();
        assert!(super::super::validate_session(&granted).is_ok());
        assert!(super::super::validate_approved(&granted, &proposal).is_ok());
    }
}
