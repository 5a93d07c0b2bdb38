//! Unit tests for vault encryption and storage

use keyring_core::vault::{
    decrypt_with_password, encrypt_with_password, FileVaultStore, KdfParams, MemoryVaultStore,
    VaultStore,
};
use keyring_core::Error;
use serde_json::json;
use std::path::PathBuf;

fn temp_vault_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("keyring-test-{}", uuid::Uuid::new_v4()))
        .join("vault.json")
}

#[tokio::test]
async fn test_file_store_lifecycle() {
    let path = temp_vault_path();
    let store = FileVaultStore::new(&path).unwrap();
    assert!(store.load().await.unwrap().is_none());

    let vault = encrypt_with_password("pw", &json!([]), &KdfParams::light()).unwrap();
    store.save(&vault).await.unwrap();
    assert_eq!(store.load().await.unwrap(), Some(vault.clone()));

    // Reopening the same path sees the saved vault
    let reopened = FileVaultStore::new(&path).unwrap();
    let loaded = reopened.load().await.unwrap().unwrap();
    let value: serde_json::Value = decrypt_with_password("pw", &loaded).unwrap();
    assert_eq!(value, json!([]));

    store.clear().await.unwrap();
    assert!(store.load().await.unwrap().is_none());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn test_file_store_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let path = temp_vault_path();
    let store = FileVaultStore::new(&path).unwrap();
    let vault = encrypt_with_password("pw", &json!({}), &KdfParams::light()).unwrap();
    store.save(&vault).await.unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_file_store_rejects_garbage() {
    let path = temp_vault_path();
    let store = FileVaultStore::new(&path).unwrap();
    std::fs::write(&path, b"not json").unwrap();

    assert!(matches!(store.load().await, Err(Error::Deserialization(_))));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn test_memory_store_seeded() {
    let vault = encrypt_with_password("pw", &json!(["x"]), &KdfParams::light()).unwrap();
    let store = MemoryVaultStore::with_vault(vault.clone());
    assert_eq!(store.load().await.unwrap(), Some(vault));

    // Clones share the same slot
    let other = store.clone();
    other.clear().await.unwrap();
    assert!(store.load().await.unwrap().is_none());
}

#[test]
fn test_wrong_password_reports_incorrect_password() {
    let vault = encrypt_with_password("right", &json!({"k": 1}), &KdfParams::light()).unwrap();
    let result: keyring_core::Result<serde_json::Value> = decrypt_with_password("wrong", &vault);
    assert!(matches!(result, Err(Error::IncorrectPassword)));
}

#[test]
fn test_tampered_ciphertext_rejected() {
    let mut vault = encrypt_with_password("pw", &json!({"k": 1}), &KdfParams::light()).unwrap();
    vault.ciphertext[0] ^= 0xff;
    let result: keyring_core::Result<serde_json::Value> = decrypt_with_password("pw", &vault);
    assert!(matches!(result, Err(Error::IncorrectPassword)));
}
