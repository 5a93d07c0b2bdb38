//! Password-based encryption for the vault and other password-gated blobs
//!
//! Keys are derived with Argon2id and payloads sealed with ChaCha20-Poly1305.
//! Every encryption draws a fresh salt and nonce. A failed AEAD open is
//! reported as [`Error::IncorrectPassword`]; no decrypted bytes ever reach an
//! error message.

use crate::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

/// Argon2id parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Time cost (iterations)
    pub t_cost: u32,
    /// Parallelism
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19_456, // 19 MiB
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway vaults
    pub fn light() -> Self {
        Self {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }

    /// Derive a 256-bit key from a password
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| Error::Encryption(format!("invalid KDF parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password.as_bytes(), salt, key.as_mut())
            .map_err(|e| Error::Encryption(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }
}

/// Password-encrypted payload, the at-rest form of the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    /// Format version
    pub version: u32,
    /// Sealed payload
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    /// ChaCha20-Poly1305 nonce (12 bytes)
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 12],
    /// Argon2id salt (32 bytes)
    #[serde(with = "hex::serde")]
    pub salt: [u8; 32],
    /// KDF parameters used for this blob
    pub kdf_params: KdfParams,
}

/// The persisted vault record
pub type EncryptedVault = EncryptedBlob;

impl EncryptedBlob {
    /// Current version of the encrypted blob format
    pub const CURRENT_VERSION: u32 = 1;

    /// Seal raw bytes under a password
    pub fn seal(password: &str, plaintext: &[u8], kdf_params: &KdfParams) -> Result<Self> {
        let salt: [u8; 32] = rand::random();
        let nonce_bytes: [u8; 12] = rand::random();

        let key = kdf_params.derive_key(password, &salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_ref().into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Self {
            version: Self::CURRENT_VERSION,
            ciphertext,
            nonce: nonce_bytes,
            salt,
            kdf_params: *kdf_params,
        })
    }

    /// Open the blob, returning the plaintext bytes
    pub fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        if self.version != Self::CURRENT_VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported vault version {}",
                self.version
            )));
        }

        let key = self.kdf_params.derive_key(password, &self.salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_ref().into());
        cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| Error::IncorrectPassword)
    }
}

/// Serialize `value` as JSON and seal it under `password`
pub fn encrypt_with_password<T: Serialize + ?Sized>(
    password: &str,
    value: &T,
    kdf_params: &KdfParams,
) -> Result<EncryptedBlob> {
    let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
    EncryptedBlob::seal(password, &plaintext, kdf_params)
}

/// Open a blob sealed by [`encrypt_with_password`] and parse its JSON
pub fn decrypt_with_password<T: DeserializeOwned>(password: &str, blob: &EncryptedBlob) -> Result<T> {
    let plaintext = blob.open(password)?;
    // serde_json messages can quote input, keep only the position
    serde_json::from_slice(&plaintext).map_err(|e| {
        Error::Deserialization(format!(
            "malformed payload at line {} column {}",
            e.line(),
            e.column()
        ))
    })
}
