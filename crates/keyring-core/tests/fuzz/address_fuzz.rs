//! Fuzz tests for address handling
//!
//! Property-based testing of normalization and resolution lookups.

use keyring_core::keyring::WatchKeyring;
use keyring_core::registry::{AccountFilter, KeyringRegistry};
use keyring_core::types::normalize_address;
use keyring_core::Keyring;
use proptest::prelude::*;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Well-formed address in mixed case
fn address_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("0[xX][a-fA-F0-9]{40}").unwrap()
}

/// Hex body of the wrong length
fn bad_length_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("0x[a-f0-9]{0,39}").unwrap(),
        prop::string::string_regex("0x[a-f0-9]{41,60}").unwrap(),
    ]
}

// ============================================================================
// Normalization
// ============================================================================

proptest! {
    #[test]
    fn fuzz_normalize_is_idempotent(address in address_strategy()) {
        let once = normalize_address(&address).unwrap();
        let twice = normalize_address(&once).unwrap();
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.starts_with("0x"));
        prop_assert_eq!(once.len(), 42);
        prop_assert_eq!(once.to_lowercase(), once.clone());
    }

    #[test]
    fn fuzz_normalize_ignores_case(address in address_strategy()) {
        let upper = normalize_address(&address.to_uppercase()).unwrap();
        let lower = normalize_address(&address.to_lowercase()).unwrap();
        prop_assert_eq!(upper, lower);
    }

    #[test]
    fn fuzz_normalize_rejects_bad_length(address in bad_length_strategy()) {
        prop_assert!(normalize_address(&address).is_err());
    }

    #[test]
    fn fuzz_normalize_never_panics(input in ".{0,64}") {
        let _ = normalize_address(&input);
    }
}

// ============================================================================
// Resolution
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fuzz_resolve_any_casing(addresses in prop::collection::hash_set("[a-f0-9]{40}", 1..6)) {
        let addresses: Vec<String> = addresses.into_iter().map(|a| format!("0x{}", a)).collect();
        let mut registry = KeyringRegistry::new();
        let mut ids = Vec::new();
        for address in &addresses {
            let keyring = WatchKeyring::new();
            keyring.add_addresses(&[address.clone()]).unwrap();
            ids.push(registry.push(Keyring::WatchAddress(keyring)).id);
        }

        for (address, id) in addresses.iter().zip(&ids) {
            let shouted = format!("0x{}", address[2..].to_uppercase());
            let found = registry.resolve(Some(shouted.as_str()), &AccountFilter::any()).unwrap();
            prop_assert_eq!(found.id, *id);
        }
    }
}
