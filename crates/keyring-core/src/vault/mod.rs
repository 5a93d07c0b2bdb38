//! Encrypted vault
//!
//! The vault is one password-encrypted blob holding the serialized state of
//! every keyring. It is only ever decrypted into the memory of an unlocked
//! session; the store sees ciphertext alone.

mod crypto;
mod store;

pub use crypto::{
    decrypt_with_password, encrypt_with_password, EncryptedBlob, EncryptedVault, KdfParams,
};
pub use store::{FileVaultStore, MemoryVaultStore, VaultStore};
