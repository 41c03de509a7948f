// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_docs_in_private_items)]

//! Property-based tests for the politeness rule.
//!
//! Uses proptest to verify:
//! 1. For any two distinct identifiers exactly one side is polite.
//! 2. The polite side is always the one holding the smaller identifier.
//! 3. Join order (which id the relay assigned first) never matters.

use pairline_proto::identity::{PeerId, Role};
use proptest::prelude::*;

/// Strategy for relay-style identifiers (`c1`, `c42`, ...).
fn arb_relay_id() -> impl Strategy<Value = PeerId> {
    (1u64..100_000).prop_map(|n| PeerId::new(format!("c{n}")))
}

/// Strategy for arbitrary printable identifiers.
fn arb_any_id() -> impl Strategy<Value = PeerId> {
    "[ -~]{0,24}".prop_map(PeerId::new)
}

proptest! {
    #[test]
    fn exactly_one_side_is_polite(a in arb_any_id(), b in arb_any_id()) {
        prop_assume!(a != b);
        let a_role = Role::between(Some(&a), Some(&b));
        let b_role = Role::between(Some(&b), Some(&a));
        prop_assert_ne!(a_role, b_role);
    }

    #[test]
    fn smaller_relay_id_is_polite(a in arb_relay_id(), b in arb_relay_id()) {
        prop_assume!(a != b);
        let (small, large) = if a.as_str() < b.as_str() { (a, b) } else { (b, a) };
        prop_assert_eq!(Role::between(Some(&small), Some(&large)), Role::Polite);
        prop_assert_eq!(Role::between(Some(&large), Some(&small)), Role::Impolite);
    }

    #[test]
    fn role_matches_byte_order(a in arb_any_id(), b in arb_any_id()) {
        let expected = a.as_str().as_bytes() < b.as_str().as_bytes();
        prop_assert_eq!(Role::between(Some(&a), Some(&b)).is_polite(), expected);
    }

    #[test]
    fn identity_with_self_is_never_polite(a in arb_any_id()) {
        prop_assert_eq!(Role::between(Some(&a), Some(&a)), Role::Impolite);
    }
}
