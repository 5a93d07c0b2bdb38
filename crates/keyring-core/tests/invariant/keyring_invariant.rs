//! Invariant tests for the keyring service
//!
//! - Resolution always picks the earliest keyring holding an address
//! - Unlock is all-or-nothing
//! - The stored vault always mirrors the live registry
//! - Signing and mutation can interleave freely

use keyring_core::types::personal_message_hash;
use keyring_core::vault::{
    decrypt_with_password, encrypt_with_password, KdfParams, MemoryVaultStore, VaultStore,
};
use keyring_core::{
    AccountFilter, Error, KeyringConfig, KeyringOptions, KeyringRecord, KeyringService,
    KeyringType, LockState, RemoteAccount,
};
use serde_json::json;
use std::sync::Arc;
use zeroize::Zeroizing;

const PASSWORD: &str = "password123";
const KEY: &str = "c87509a1c067bbde78beb793e6fa76530b6382a4c0241e5e4a9ec0a0f44dc0d3";
const ADDRESS: &str = "0x627306090abab3a6e1400e9345bc60c78a8bef57";

fn config() -> KeyringConfig {
    KeyringConfig::default().with_kdf(KdfParams::light())
}

fn private_key(key: &str) -> KeyringOptions {
    KeyringOptions::PrivateKeys(vec![Zeroizing::new(key.to_string())])
}

fn watch(address: &str) -> KeyringOptions {
    KeyringOptions::Watch {
        addresses: vec![address.to_string()],
    }
}

/// Invariant: the first inserted keyring holding an address wins
#[tokio::test]
async fn invariant_resolution_is_insertion_ordered() {
    let service = KeyringService::new(Arc::new(MemoryVaultStore::new()), config());
    service.boot(PASSWORD).await.unwrap();

    let remote = service
        .add_new_keyring(
            KeyringType::WalletConnect,
            KeyringOptions::Remote {
                accounts: vec![RemoteAccount::new(ADDRESS, "MetaMask")],
            },
        )
        .await
        .unwrap();
    let simple = service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();

    let upper = ADDRESS.to_uppercase().replace("0X", "0x");
    for _ in 0..10 {
        let handle = service
            .get_keyring_for_account(Some(upper.as_str()), &AccountFilter::any())
            .await
            .unwrap();
        assert_eq!(handle.id, remote.id);
    }

    // Same order after a lock cycle
    service.set_locked().await.unwrap();
    service.submit_password(PASSWORD).await.unwrap();
    let handle = service
        .get_keyring_for_account(Some(ADDRESS), &AccountFilter::any())
        .await
        .unwrap();
    assert_eq!(handle.keyring.keyring_type(), KeyringType::WalletConnect);

    service
        .remove_account(ADDRESS, KeyringType::WalletConnect, Some("MetaMask"))
        .await
        .unwrap();
    let handle = service
        .get_keyring_for_account(Some(ADDRESS), &AccountFilter::any())
        .await
        .unwrap();
    assert_eq!(handle.keyring.keyring_type(), KeyringType::SimpleKeyPair);
    assert_ne!(handle.id, simple.id, "registry IDs are per unlock");
}

/// Invariant: one bad record leaves the service locked with nothing loaded
#[tokio::test]
async fn invariant_unlock_all_or_nothing() {
    let records = vec![
        KeyringRecord {
            keyring_type: "Simple Key Pair".into(),
            data: json!([KEY]),
        },
        KeyringRecord {
            keyring_type: "Simple Key Pair".into(),
            data: json!(["not-a-key"]),
        },
    ];
    let vault = encrypt_with_password(PASSWORD, &records, &KdfParams::light()).unwrap();
    let service = KeyringService::new(Arc::new(MemoryVaultStore::with_vault(vault)), config());

    let result = service.submit_password(PASSWORD).await;
    assert!(matches!(result, Err(Error::InvalidKey(_))));
    assert_eq!(service.lock_state().await.unwrap(), LockState::Locked);
    assert!(service.get_keyrings().await.is_empty());
}

/// Invariant: after every mutation the vault decrypts to the live registry
#[tokio::test]
async fn invariant_vault_mirrors_registry() {
    let store = Arc::new(MemoryVaultStore::new());
    let service = KeyringService::new(store.clone(), config());
    service.boot(PASSWORD).await.unwrap();

    let mut salts = Vec::new();
    let check = |records: Vec<KeyringRecord>, expected: Vec<KeyringType>| {
        let types: Vec<String> = records.into_iter().map(|r| r.keyring_type).collect();
        let expected: Vec<String> = expected.iter().map(|t| t.as_str().to_string()).collect();
        assert_eq!(types, expected);
    };

    let vault = store.load().await.unwrap().unwrap();
    salts.push(vault.salt);
    check(decrypt_with_password(PASSWORD, &vault).unwrap(), vec![]);

    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    let vault = store.load().await.unwrap().unwrap();
    salts.push(vault.salt);
    check(
        decrypt_with_password(PASSWORD, &vault).unwrap(),
        vec![KeyringType::SimpleKeyPair],
    );

    service
        .add_new_keyring(
            KeyringType::WatchAddress,
            watch("0x0000000000000000000000000000000000000001"),
        )
        .await
        .unwrap();
    let vault = store.load().await.unwrap().unwrap();
    salts.push(vault.salt);
    check(
        decrypt_with_password(PASSWORD, &vault).unwrap(),
        vec![KeyringType::SimpleKeyPair, KeyringType::WatchAddress],
    );

    service
        .remove_account(ADDRESS, KeyringType::SimpleKeyPair, None)
        .await
        .unwrap();
    let vault = store.load().await.unwrap().unwrap();
    salts.push(vault.salt);
    check(
        decrypt_with_password(PASSWORD, &vault).unwrap(),
        vec![KeyringType::WatchAddress],
    );

    // Fresh salt on every write
    salts.sort();
    salts.dedup();
    assert_eq!(salts.len(), 4);
}

/// Invariant: failed mutations leave the vault untouched
#[tokio::test]
async fn invariant_failed_mutation_keeps_vault() {
    let store = Arc::new(MemoryVaultStore::new());
    let service = KeyringService::new(store.clone(), config());
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    let before = store.load().await.unwrap();

    assert!(service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .is_err());
    assert!(service
        .add_new_keyring(KeyringType::WatchAddress, watch("0x12"))
        .await
        .is_err());
    assert!(service
        .remove_account(
            "0x0000000000000000000000000000000000000002",
            KeyringType::SimpleKeyPair,
            None
        )
        .await
        .is_err());

    assert_eq!(store.load().await.unwrap(), before);
}

/// Invariant: signing while keyrings are added never observes a torn registry
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_concurrent_sign_and_mutate() {
    let service = Arc::new(KeyringService::new(Arc::new(MemoryVaultStore::new()), config()));
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let message = [i; 4];
            let signature = service
                .sign_personal_message(ADDRESS, &message, &AccountFilter::any())
                .await
                .unwrap();
            assert_eq!(
                signature
                    .recover_address(&personal_message_hash(&message))
                    .unwrap(),
                ADDRESS
            );
        }));
    }
    for i in 1..=4u8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let address = format!("0x{}", hex::encode([i; 20]));
            service
                .add_new_keyring(KeyringType::WatchAddress, watch(&address))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(service.get_keyrings().await.len(), 5);
}
