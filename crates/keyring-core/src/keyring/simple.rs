//! Simple key pair keyring: imported raw secp256k1 private keys

use super::{KeyringAdapter, SignerRef};
use crate::types::{
    address_from_verifying_key, normalize_address, personal_message_hash, Account, KeyringType,
    Signature, TransactionRequest, TypedDataRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use parking_lot::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

/// Sign a 32-byte prehash with a secp256k1 key
pub(crate) fn sign_prehash(key: &SigningKey, prehash: &[u8; 32]) -> Result<Signature> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(prehash)
        .map_err(|e| Error::Crypto(format!("signing failed: {}", e)))?;
    Ok(Signature::from_recoverable(&sig, recovery_id))
}

/// Parse a hex private key, with or without `0x`
pub(crate) fn parse_private_key(hex_key: &str) -> Result<SigningKey> {
    let body = hex_key.trim();
    let body = body.strip_prefix("0x").unwrap_or(body);
    let bytes = Zeroizing::new(
        hex::decode(body).map_err(|_| Error::InvalidKey("expected 32 hex-encoded bytes".into()))?,
    );
    if bytes.len() != 32 {
        return Err(Error::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    SigningKey::from_slice(&bytes).map_err(|_| Error::InvalidKey("not a valid secp256k1 scalar".into()))
}

struct KeyPair {
    address: String,
    key: SigningKey,
}

impl KeyPair {
    fn new(key: SigningKey) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self { address, key }
    }
}

/// Keyring holding raw private keys
#[derive(Default)]
pub struct SimpleKeyring {
    pairs: RwLock<Vec<KeyPair>>,
}

impl SimpleKeyring {
    /// Empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyring seeded from hex private keys; duplicates in the input are rejected
    pub fn from_private_keys(keys: &[Zeroizing<String>]) -> Result<Self> {
        let keyring = Self::new();
        {
            let mut pairs = keyring.pairs.write();
            for key in keys {
                let pair = KeyPair::new(parse_private_key(key)?);
                if pairs.iter().any(|p| p.address == pair.address) {
                    return Err(Error::DuplicateAccount(pair.address));
                }
                pairs.push(pair);
            }
        }
        Ok(keyring)
    }

    /// Rebuild from the persisted array of hex keys
    pub fn deserialize(data: &serde_json::Value) -> Result<Self> {
        let keys: Vec<Zeroizing<String>> = serde_json::from_value::<Vec<String>>(data.clone())
            .map_err(|e| Error::Deserialization(format!("simple keyring: {}", e)))?
            .into_iter()
            .map(Zeroizing::new)
            .collect();
        Self::from_private_keys(&keys)
    }

    fn with_key<T>(&self, address: &str, f: impl FnOnce(&SigningKey) -> Result<T>) -> Result<T> {
        let address = normalize_address(address)?;
        let pairs = self.pairs.read();
        let pair = pairs
            .iter()
            .find(|p| p.address == address)
            .ok_or(Error::NoKeyringFound)?;
        f(&pair.key)
    }
}

#[async_trait]
impl KeyringAdapter for SimpleKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::SimpleKeyPair
    }

    fn accounts(&self) -> Vec<Account> {
        self.pairs
            .read()
            .iter()
            .map(|p| Account::new(p.address.clone(), KeyringType::SimpleKeyPair))
            .collect()
    }

    async fn add_accounts(&self, count: usize) -> Result<Vec<String>> {
        let mut pairs = self.pairs.write();
        let mut added = Vec::new();
        for _ in 0..count {
            let pair = KeyPair::new(SigningKey::random(&mut rand::rngs::OsRng));
            added.push(pair.address.clone());
            pairs.push(pair);
        }
        debug!(count = added.len(), "Generated simple key pairs");
        Ok(added)
    }

    async fn remove_account(&self, address: &str, _brand: Option<&str>) -> Result<()> {
        let address = normalize_address(address)?;
        let mut pairs = self.pairs.write();
        let before = pairs.len();
        pairs.retain(|p| p.address != address);
        if pairs.len() == before {
            return Err(Error::NoKeyringFound);
        }
        Ok(())
    }

    async fn sign_transaction(
        &self,
        signer: SignerRef<'_>,
        tx: &TransactionRequest,
    ) -> Result<Signature> {
        let hash = tx.signing_hash();
        self.with_key(signer.address, |key| sign_prehash(key, &hash))
    }

    async fn sign_personal_message(
        &self,
        signer: SignerRef<'_>,
        message: &[u8],
    ) -> Result<Signature> {
        let hash = personal_message_hash(message);
        self.with_key(signer.address, |key| sign_prehash(key, &hash))
    }

    async fn sign_typed_data(
        &self,
        signer: SignerRef<'_>,
        data: &TypedDataRequest,
    ) -> Result<Signature> {
        let hash = data.signing_hash();
        self.with_key(signer.address, |key| sign_prehash(key, &hash))
    }

    fn export_account(&self, address: &str) -> Result<Zeroizing<String>> {
        self.with_key(address, |key| {
            Ok(Zeroizing::new(hex::encode(key.to_bytes())))
        })
    }

    fn serialize(&self) -> Result<serde_json::Value> {
        let keys: Vec<String> = self
            .pairs
            .read()
            .iter()
            .map(|p| hex::encode(p.key.to_bytes()))
            .collect();
        Ok(serde_json::Value::from(keys))
    }
}
