//! Namespace types, validation and auto-approval.
//!
//! A namespace key is either a bare CAIP-2 namespace (`eip155`), whose entry
//! lists its chains explicitly, or a single chain (`eip155:1`), whose entry
//! must not.

mod auto;
mod errors;
mod types;
mod validation;

use std::collections::HashSet;
use std::hash::Hash;

pub use auto::build_auto;
pub use errors::{AutoNamespacesError, UnsupportedNamespace};
pub use types::{
    Account, Blockchain, ParseIdentifierError, ProposalNamespace, ProposalNamespaces,
    SessionNamespace, SessionNamespaces, SessionProperties,
};
pub use validation::{validate_approved, validate_proposal, validate_session, validate_session_properties};

/// Union preserving first-seen order: all of `first`, then the new items of
/// `second`.
pub fn ordered_union<T: Clone + Eq + Hash>(first: &[T], second: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(first.len() + second.len());
    first
        .iter()
        .chain(second)
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

fn union_optional<T: Clone + Eq + Hash>(first: Option<&Vec<T>>, second: Option<&Vec<T>>) -> Option<Vec<T>> {
    match (first, second) {
        (None, None) => None,
        (a, b) => Some(ordered_union(
            a.map(Vec::as_slice).unwrap_or_default(),
            b.map(Vec::as_slice).unwrap_or_default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_union() {
        assert_eq!(ordered_union(&[1, 2, 3], &[3, 4, 1, 5]), vec![1, 2, 3, 4, 5]);
        assert_eq!(ordered_union::<u8>(&[], &[2, 2]), vec![2]);
        assert_eq!(union_optional::<u8>(None, None), None);
        assert_eq!(union_optional(Some(&vec![1]), None), Some(vec![1]));
    }
}
