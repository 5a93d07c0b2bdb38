//! Service flows over software keyrings
//!
//! Boot, import, sign, lock, unlock and remove against an in-memory or
//! file-backed vault.

use async_trait::async_trait;
use keyring_core::types::personal_message_hash;
use keyring_core::vault::{EncryptedVault, FileVaultStore, KdfParams, MemoryVaultStore, VaultStore};
use keyring_core::{
    AccountFilter, Error, KeyringConfig, KeyringOptions, KeyringService, KeyringType, LockState,
    Result, TransactionRequest, TypedDataRequest,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

const PASSWORD: &str = "password123";
const KEY: &str = "c87509a1c067bbde78beb793e6fa76530b6382a4c0241e5e4a9ec0a0f44dc0d3";
const ADDRESS: &str = "0x627306090abab3a6e1400e9345bc60c78a8bef57";
const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const HD_FIRST: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";

fn config() -> KeyringConfig {
    KeyringConfig::default().with_kdf(KdfParams::light())
}

fn service() -> KeyringService {
    KeyringService::new(Arc::new(MemoryVaultStore::new()), config())
}

fn private_key(key: &str) -> KeyringOptions {
    KeyringOptions::PrivateKeys(vec![Zeroizing::new(key.to_string())])
}

fn mnemonic(accounts: usize) -> KeyringOptions {
    KeyringOptions::Mnemonic {
        phrase: Some(Zeroizing::new(PHRASE.to_string())),
        passphrase: None,
        accounts,
    }
}

#[tokio::test]
async fn test_import_private_key() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();

    assert_eq!(service.get_accounts().await, vec![ADDRESS]);
}

#[tokio::test]
async fn test_hd_add_account() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    let info = service
        .add_new_keyring(KeyringType::HdKeyTree, mnemonic(1))
        .await
        .unwrap();
    assert_eq!(service.get_accounts().await.len(), 1);

    let added = service.add_new_account(&info.id).await.unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(service.get_accounts().await.len(), 2);
    assert_eq!(service.get_accounts().await[0], HD_FIRST);

    let keyrings = service.get_keyrings().await;
    assert_eq!(keyrings.len(), 1);
    assert_eq!(keyrings[0].accounts.len(), 2);
}

#[tokio::test]
async fn test_removing_last_account_evicts_keyring() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    let before = service.get_keyrings().await.len();

    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    assert_eq!(service.get_keyrings().await.len(), before + 1);

    service
        .remove_account(ADDRESS, KeyringType::SimpleKeyPair, None)
        .await
        .unwrap();
    assert_eq!(service.get_keyrings().await.len(), before);
    assert!(service.get_accounts().await.is_empty());

    // Eviction survives a lock cycle
    service.set_locked().await.unwrap();
    service.submit_password(PASSWORD).await.unwrap();
    assert_eq!(service.get_keyrings().await.len(), before);
}

#[tokio::test]
async fn test_resolve_without_address() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();

    let result = service
        .get_keyring_for_account(None, &AccountFilter::any())
        .await;
    assert!(matches!(result, Err(Error::NoKeyringFound)));
}

#[tokio::test]
async fn test_lock_unlock_round_trip() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    service
        .add_new_keyring(KeyringType::HdKeyTree, mnemonic(2))
        .await
        .unwrap();
    let before = service.get_accounts_detailed().await;

    service.set_locked().await.unwrap();
    assert!(!service.is_unlocked().await);
    assert!(service.get_accounts().await.is_empty());

    let accounts = service.unlock_keyrings(PASSWORD).await.unwrap();
    assert_eq!(accounts, before);
    assert_eq!(service.get_accounts_detailed().await, before);

    let signature = service
        .sign_personal_message(HD_FIRST, b"after unlock", &AccountFilter::any())
        .await
        .unwrap();
    assert_eq!(
        signature
            .recover_address(&personal_message_hash(b"after unlock"))
            .unwrap(),
        HD_FIRST
    );
}

#[tokio::test]
async fn test_wrong_password_keeps_state() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    service.set_locked().await.unwrap();

    let result = service.submit_password("wrong").await;
    assert!(matches!(result, Err(Error::IncorrectPassword)));
    assert_eq!(service.lock_state().await.unwrap(), LockState::Locked);
    assert!(service.get_accounts().await.is_empty());

    assert!(matches!(
        service.verify_password("wrong").await,
        Err(Error::IncorrectPassword)
    ));
    service.verify_password(PASSWORD).await.unwrap();
}

#[tokio::test]
async fn test_sign_all_payload_kinds() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    let filter = AccountFilter::of_type(KeyringType::SimpleKeyPair);

    let tx = TransactionRequest::new(ADDRESS, vec![0xde, 0xad, 0xbe, 0xef]).with_chain_id(1);
    let signature = service.sign_transaction(ADDRESS, &tx, &filter).await.unwrap();
    assert_eq!(signature.recover_address(&tx.signing_hash()).unwrap(), ADDRESS);

    let typed = TypedDataRequest::new([1u8; 32], [2u8; 32], json!({"primaryType": "Mail"}));
    let signature = service.sign_typed_data(ADDRESS, &typed, &filter).await.unwrap();
    assert_eq!(signature.recover_address(&typed.signing_hash()).unwrap(), ADDRESS);

    let wrong_type = AccountFilter::of_type(KeyringType::HdKeyTree);
    let result = service.sign_transaction(ADDRESS, &tx, &wrong_type).await;
    assert!(matches!(result, Err(Error::NoKeyringFound)));
}

#[tokio::test]
async fn test_watch_only_cannot_sign() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(
            KeyringType::WatchAddress,
            KeyringOptions::Watch {
                addresses: vec![ADDRESS.to_string()],
            },
        )
        .await
        .unwrap();

    let result = service
        .sign_personal_message(ADDRESS, b"hi", &AccountFilter::any())
        .await;
    assert!(matches!(
        result,
        Err(Error::NotSupported {
            keyring_type: KeyringType::WatchAddress,
            ..
        })
    ));

    // The key of a watched address cannot shadow the watch entry
    let result = service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await;
    assert!(matches!(result, Err(Error::DuplicateAccount(a)) if a == ADDRESS));
    assert_eq!(service.get_keyrings().await.len(), 1);
}

#[tokio::test]
async fn test_exports_check_password() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    service
        .add_new_keyring(KeyringType::HdKeyTree, mnemonic(1))
        .await
        .unwrap();

    assert!(matches!(
        service.export_private_key(ADDRESS, "wrong").await,
        Err(Error::IncorrectPassword)
    ));
    let key = service.export_private_key(ADDRESS, PASSWORD).await.unwrap();
    assert_eq!(key.as_str(), KEY);

    let phrase = service.export_mnemonic(HD_FIRST, PASSWORD).await.unwrap();
    assert_eq!(phrase.as_str(), PHRASE);
    assert!(matches!(
        service.export_mnemonic(ADDRESS, PASSWORD).await,
        Err(Error::NoKeyringFound)
    ));
}

#[tokio::test]
async fn test_add_account_rejects_foreign_duplicate() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    let hd = service
        .add_new_keyring(KeyringType::HdKeyTree, mnemonic(1))
        .await
        .unwrap();

    // Import the key of HD index 1 as a simple key pair first
    let second_key = {
        let scratch = KeyringService::new(Arc::new(MemoryVaultStore::new()), config());
        scratch.boot("x").await.unwrap();
        scratch
            .add_new_keyring(KeyringType::HdKeyTree, mnemonic(2))
            .await
            .unwrap();
        let second = scratch.get_accounts().await[1].clone();
        scratch.export_private_key(&second, "x").await.unwrap()
    };
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(&second_key))
        .await
        .unwrap();

    let result = service.add_new_account(&hd.id).await;
    assert!(matches!(result, Err(Error::DuplicateAccount(_))));

    // Rolled back: the HD keyring still holds one account
    let keyrings = service.get_keyrings().await;
    assert_eq!(keyrings[0].accounts.len(), 1);
    assert_eq!(service.get_accounts().await.len(), 2);
}

#[tokio::test]
async fn test_file_vault_survives_restart() {
    let path = std::env::temp_dir()
        .join(format!("keyring-flow-{}", uuid::Uuid::new_v4()))
        .join("vault.json");

    {
        let store = Arc::new(FileVaultStore::new(&path).unwrap());
        let service = KeyringService::new(store, config());
        service.boot(PASSWORD).await.unwrap();
        service
            .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
            .await
            .unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains(KEY));
    assert!(!raw.contains(&ADDRESS[2..]));

    let store = Arc::new(FileVaultStore::new(&path).unwrap());
    let service = KeyringService::new(store, config());
    assert_eq!(service.lock_state().await.unwrap(), LockState::Locked);
    assert!(matches!(service.boot(PASSWORD).await, Err(Error::AlreadyBooted)));

    let accounts = service.submit_password(PASSWORD).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].address, ADDRESS);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

/// Memory store whose writes can be switched off
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryVaultStore,
    refuse_saves: AtomicBool,
}

#[async_trait]
impl VaultStore for SwitchableStore {
    async fn load(&self) -> Result<Option<EncryptedVault>> {
        self.inner.load().await
    }

    async fn save(&self, vault: &EncryptedVault) -> Result<()> {
        if self.refuse_saves.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".into()));
        }
        self.inner.save(vault).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

#[tokio::test]
async fn test_remove_account_restores_on_persist_failure() {
    let store = Arc::new(SwitchableStore::default());
    let service = KeyringService::new(store.clone(), config());
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();
    service
        .add_new_keyring(KeyringType::HdKeyTree, mnemonic(2))
        .await
        .unwrap();
    let before = service.get_accounts().await;

    store.refuse_saves.store(true, Ordering::SeqCst);
    // Evicting removal
    let result = service
        .remove_account(ADDRESS, KeyringType::SimpleKeyPair, None)
        .await;
    assert!(matches!(result, Err(Error::Storage(_))));
    // Non-evicting removal
    let result = service
        .remove_account(HD_FIRST, KeyringType::HdKeyTree, None)
        .await;
    assert!(matches!(result, Err(Error::Storage(_))));

    assert_eq!(service.get_accounts().await, before);
    let signature = service
        .sign_personal_message(ADDRESS, b"still here", &AccountFilter::any())
        .await
        .unwrap();
    assert_eq!(
        signature
            .recover_address(&personal_message_hash(b"still here"))
            .unwrap(),
        ADDRESS
    );

    // The vault agrees with memory
    store.refuse_saves.store(false, Ordering::SeqCst);
    service.set_locked().await.unwrap();
    service.submit_password(PASSWORD).await.unwrap();
    assert_eq!(service.get_accounts().await, before);
}

#[tokio::test]
async fn test_add_keyring_without_accounts_rejected() {
    let service = service();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(KeyringType::SimpleKeyPair, private_key(KEY))
        .await
        .unwrap();

    let attempts = vec![
        (KeyringType::SimpleKeyPair, KeyringOptions::PrivateKeys(vec![])),
        (KeyringType::HdKeyTree, mnemonic(0)),
        (KeyringType::HdKeyTree, mnemonic(usize::MAX)),
        (KeyringType::WatchAddress, KeyringOptions::Watch { addresses: vec![] }),
        (KeyringType::WalletConnect, KeyringOptions::Remote { accounts: vec![] }),
    ];
    for (keyring_type, options) in attempts {
        let result = service.add_new_keyring(keyring_type, options).await;
        assert!(matches!(result, Err(Error::InvalidOptions(_))), "{}", keyring_type);
    }
    assert_eq!(service.get_keyrings().await.len(), 1);

    // Options-less simple keyrings generate their first account
    let generated = service
        .add_new_keyring(KeyringType::SimpleKeyPair, KeyringOptions::Empty)
        .await
        .unwrap();
    assert_eq!(generated.accounts.len(), 1);

    service.set_locked().await.unwrap();
    service.submit_password(PASSWORD).await.unwrap();
    let keyrings = service.get_keyrings().await;
    assert_eq!(keyrings.len(), 2);
    assert!(keyrings.iter().all(|k| !k.accounts.is_empty()));
}
