//! Unit tests for keyring adapters and vault records

use keyring_core::keyring::{HdKeyring, KeyringContext, SignerRef};
use keyring_core::types::personal_message_hash;
use keyring_core::{
    Error, Keyring, KeyringAdapter, KeyringConfig, KeyringOptions, KeyringRecord, KeyringType,
    RemoteAccount,
};
use serde_json::json;
use std::sync::Arc;
use zeroize::Zeroizing;

const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const HD_FIRST: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";
const HD_SECOND: &str = "0x6fac4d18c912343bf86fa7049364dd4e424ab9c0";
const KEY: &str = "c87509a1c067bbde78beb793e6fa76530b6382a4c0241e5e4a9ec0a0f44dc0d3";
const KEY_ADDRESS: &str = "0x627306090abab3a6e1400e9345bc60c78a8bef57";

fn ctx() -> KeyringContext {
    KeyringContext::software_only(Arc::new(KeyringConfig::default()))
}

fn mnemonic(accounts: usize) -> KeyringOptions {
    KeyringOptions::Mnemonic {
        phrase: Some(Zeroizing::new(PHRASE.to_string())),
        passphrase: None,
        accounts,
    }
}

#[tokio::test]
async fn test_hd_known_vectors() {
    let keyring = Keyring::from_options(KeyringType::HdKeyTree, mnemonic(2), &ctx())
        .await
        .unwrap();
    let addresses: Vec<String> = keyring
        .adapter()
        .accounts()
        .into_iter()
        .map(|a| a.address)
        .collect();
    assert_eq!(addresses, vec![HD_FIRST, HD_SECOND]);
}

#[tokio::test]
async fn test_hd_passphrase_changes_accounts() {
    let keyring = Keyring::from_options(
        KeyringType::HdKeyTree,
        KeyringOptions::Mnemonic {
            phrase: Some(Zeroizing::new(PHRASE.to_string())),
            passphrase: Some(Zeroizing::new("TREZOR".to_string())),
            accounts: 1,
        },
        &ctx(),
    )
    .await
    .unwrap();
    assert_ne!(keyring.adapter().accounts()[0].address, HD_FIRST);
}

#[tokio::test]
async fn test_hd_record_keeps_indexes() {
    let keyring = HdKeyring::from_phrase(PHRASE, None, keyring_core::config::DEFAULT_HD_PATH).unwrap();
    keyring.add_accounts(3).await.unwrap();
    keyring.remove_account(HD_SECOND, None).await.unwrap();

    let record = Keyring::HdKeyTree(keyring).to_record().unwrap();
    assert_eq!(record.keyring_type, "HD Key Tree");
    assert_eq!(record.data["indexes"], json!([0, 2]));

    let restored = Keyring::from_record(&record, &ctx()).unwrap();
    let accounts = restored.adapter().accounts();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].address, HD_FIRST);
    assert_eq!(restored.adapter().export_mnemonic().unwrap().as_str(), PHRASE);
}

#[tokio::test]
async fn test_hd_invalid_mnemonic() {
    let result = Keyring::from_options(
        KeyringType::HdKeyTree,
        KeyringOptions::Mnemonic {
            phrase: Some(Zeroizing::new("abandon abandon abandon".to_string())),
            passphrase: None,
            accounts: 1,
        },
        &ctx(),
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidMnemonic(_))));
}

#[tokio::test]
async fn test_options_must_match_type() {
    let result = Keyring::from_options(
        KeyringType::WatchAddress,
        KeyringOptions::PrivateKeys(vec![Zeroizing::new(KEY.to_string())]),
        &ctx(),
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, Error::InvalidOptions(_)));
    // The redacted options never leak the key
    assert!(!err.to_string().contains(KEY));
}

#[test]
fn test_record_shape() {
    let record = KeyringRecord {
        keyring_type: KeyringType::SimpleKeyPair.as_str().to_string(),
        data: json!([KEY]),
    };
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value, json!({"type": "Simple Key Pair", "data": [KEY]}));

    let keyring = Keyring::from_record(&record, &ctx()).unwrap();
    assert_eq!(keyring.adapter().accounts()[0].address, KEY_ADDRESS);
}

#[tokio::test]
async fn test_remote_accounts_per_brand() {
    let keyring = Keyring::from_options(
        KeyringType::WalletConnect,
        KeyringOptions::Remote {
            accounts: vec![
                RemoteAccount::new(KEY_ADDRESS, "MetaMask"),
                RemoteAccount::new(KEY_ADDRESS.to_uppercase().replace("0X", "0x"), "Rainbow"),
            ],
        },
        &ctx(),
    )
    .await
    .unwrap();

    let adapter = keyring.adapter();
    assert_eq!(adapter.account_count(), 2);
    assert!(adapter.has_account(KEY_ADDRESS, Some("Rainbow")));
    assert!(!adapter.has_account(KEY_ADDRESS, Some("Trust")));

    // Signing needs a session transport
    let result = adapter
        .sign_personal_message(SignerRef::with_brand(KEY_ADDRESS, Some("MetaMask")), b"hi")
        .await;
    assert!(matches!(result, Err(Error::TransportUnavailable(_))));
}

#[tokio::test]
async fn test_hardware_without_bridge() {
    let result = Keyring::from_options(
        KeyringType::Hardware,
        KeyringOptions::Hardware {
            brand: "Ledger".into(),
            indexes: vec![0],
        },
        &ctx(),
    )
    .await;
    assert!(matches!(result, Err(Error::TransportUnavailable(_))));
}

#[tokio::test]
async fn test_simple_signature_recovers() {
    let keyring = Keyring::from_options(
        KeyringType::SimpleKeyPair,
        KeyringOptions::PrivateKeys(vec![Zeroizing::new(KEY.to_string())]),
        &ctx(),
    )
    .await
    .unwrap();

    let signature = keyring
        .adapter()
        .sign_personal_message(SignerRef::new(KEY_ADDRESS), b"hello world")
        .await
        .unwrap();
    assert!(signature.v() == 27 || signature.v() == 28);
    assert_eq!(
        signature
            .recover_address(&personal_message_hash(b"hello world"))
            .unwrap(),
        KEY_ADDRESS
    );
}
