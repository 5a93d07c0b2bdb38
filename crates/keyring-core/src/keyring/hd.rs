//! HD key tree keyring: BIP-39 mnemonic, BIP-32 derivation along `hd_path/i`

use super::simple::sign_prehash;
use super::{index_after, KeyringAdapter, SignerRef};
use crate::types::{
    address_from_verifying_key, normalize_address, personal_message_hash, Account, KeyringType,
    Signature, TransactionRequest, TypedDataRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use k256::ecdsa::SigningKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

/// Words in a generated mnemonic
const GENERATED_WORD_COUNT: usize = 12;

/// Parse a mnemonic, tolerating case and extra whitespace
pub(crate) fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))
}

/// Derive the signing key at a full derivation path
pub(crate) fn derive_path_key(seed: &[u8], path: &str) -> Result<SigningKey> {
    let parsed: DerivationPath = path
        .parse()
        .map_err(|e| Error::InvalidOptions(format!("invalid derivation path {}: {}", path, e)))?;
    let xprv = XPrv::derive_from_path(seed, &parsed)
        .map_err(|e| Error::Crypto(format!("derivation failed: {}", e)))?;
    Ok(xprv.private_key().clone())
}

/// Derive the signing key at `hd_path/index`
pub(crate) fn derive_key(seed: &[u8], hd_path: &str, index: u32) -> Result<SigningKey> {
    derive_path_key(seed, &format!("{}/{}", hd_path, index))
}

struct HdWallet {
    index: u32,
    address: String,
    key: SigningKey,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HdState {
    mnemonic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passphrase: Option<String>,
    hd_path: String,
    indexes: Vec<u32>,
}

/// Keyring deriving accounts from a mnemonic
pub struct HdKeyring {
    hd_path: String,
    mnemonic: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
    seed: Zeroizing<[u8; 64]>,
    wallets: RwLock<Vec<HdWallet>>,
}

impl HdKeyring {
    /// Keyring from an existing phrase, with no accounts yet
    pub fn from_phrase(phrase: &str, passphrase: Option<&str>, hd_path: &str) -> Result<Self> {
        let mnemonic = parse_mnemonic(phrase)?;
        Ok(Self::from_mnemonic(&mnemonic, passphrase, hd_path))
    }

    /// Keyring from a freshly generated 12-word phrase
    pub fn generate(passphrase: Option<&str>, hd_path: &str) -> Result<Self> {
        let mnemonic = Mnemonic::generate_in(Language::English, GENERATED_WORD_COUNT)
            .map_err(|e| Error::Crypto(format!("mnemonic generation failed: {}", e)))?;
        Ok(Self::from_mnemonic(&mnemonic, passphrase, hd_path))
    }

    fn from_mnemonic(mnemonic: &Mnemonic, passphrase: Option<&str>, hd_path: &str) -> Self {
        Self {
            hd_path: hd_path.to_string(),
            mnemonic: Zeroizing::new(mnemonic.to_string()),
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_string())),
            seed: Zeroizing::new(mnemonic.to_seed(passphrase.unwrap_or(""))),
            wallets: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild from persisted state, re-deriving every stored index
    pub fn deserialize(data: &serde_json::Value) -> Result<Self> {
        let state: HdState = serde_json::from_value(data.clone())
            .map_err(|_| Error::Deserialization("HD keyring: malformed state".into()))?;
        let state_mnemonic = Zeroizing::new(state.mnemonic);
        let state_passphrase = state.passphrase.map(Zeroizing::new);

        let keyring = Self::from_phrase(
            &state_mnemonic,
            state_passphrase.as_ref().map(|p| p.as_str()),
            &state.hd_path,
        )?;
        for index in state.indexes {
            keyring.derive_index(index)?;
        }
        Ok(keyring)
    }

    /// Derivation path prefix
    pub fn hd_path(&self) -> &str {
        &self.hd_path
    }

    /// Derivation indexes of held accounts
    pub fn indexes(&self) -> Vec<u32> {
        self.wallets.read().iter().map(|w| w.index).collect()
    }

    fn derive_index(&self, index: u32) -> Result<String> {
        let key = derive_key(&self.seed[..], &self.hd_path, index)?;
        let address = address_from_verifying_key(key.verifying_key());

        let mut wallets = self.wallets.write();
        if wallets.iter().any(|w| w.address == address) {
            return Err(Error::DuplicateAccount(address));
        }
        wallets.push(HdWallet {
            index,
            address: address.clone(),
            key,
        });
        Ok(address)
    }

    fn next_index(&self) -> Result<u32> {
        let last = self.wallets.read().iter().map(|w| w.index).max();
        match last {
            Some(last) => index_after(last),
            None => Ok(0),
        }
    }

    fn sign_hash(&self, address: &str, hash: &[u8; 32]) -> Result<Signature> {
        let address = normalize_address(address)?;
        let wallets = self.wallets.read();
        let wallet = wallets
            .iter()
            .find(|w| w.address == address)
            .ok_or(Error::NoKeyringFound)?;
        sign_prehash(&wallet.key, hash)
    }
}

#[async_trait]
impl KeyringAdapter for HdKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::HdKeyTree
    }

    fn accounts(&self) -> Vec<Account> {
        self.wallets
            .read()
            .iter()
            .map(|w| Account::new(w.address.clone(), KeyringType::HdKeyTree))
            .collect()
    }

    async fn add_accounts(&self, count: usize) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for _ in 0..count {
            let index = self.next_index()?;
            added.push(self.derive_index(index)?);
            debug!(index, "Derived HD account");
        }
        Ok(added)
    }

    async fn remove_account(&self, address: &str, _brand: Option<&str>) -> Result<()> {
        let address = normalize_address(address)?;
        let mut wallets = self.wallets.write();
        let before = wallets.len();
        wallets.retain(|w| w.address != address);
        if wallets.len() == before {
            return Err(Error::NoKeyringFound);
        }
        Ok(())
    }

    async fn sign_transaction(
        &self,
        signer: SignerRef<'_>,
        tx: &TransactionRequest,
    ) -> Result<Signature> {
        self.sign_hash(signer.address, &tx.signing_hash())
    }

    async fn sign_personal_message(
        &self,
        signer: SignerRef<'_>,
        message: &[u8],
    ) -> Result<Signature> {
        self.sign_hash(signer.address, &personal_message_hash(message))
    }

    async fn sign_typed_data(
        &self,
        signer: SignerRef<'_>,
        data: &TypedDataRequest,
    ) -> Result<Signature> {
        self.sign_hash(signer.address, &data.signing_hash())
    }

    fn export_account(&self, address: &str) -> Result<Zeroizing<String>> {
        let address = normalize_address(address)?;
        let wallets = self.wallets.read();
        let wallet = wallets
            .iter()
            .find(|w| w.address == address)
            .ok_or(Error::NoKeyringFound)?;
        Ok(Zeroizing::new(hex::encode(wallet.key.to_bytes())))
    }

    fn export_mnemonic(&self) -> Result<Zeroizing<String>> {
        Ok(self.mnemonic.clone())
    }

    fn serialize(&self) -> Result<serde_json::Value> {
        let state = HdState {
            mnemonic: self.mnemonic.as_str().to_string(),
            passphrase: self.passphrase.as_ref().map(|p| p.as_str().to_string()),
            hd_path: self.hd_path.clone(),
            indexes: self.indexes(),
        };
        Ok(serde_json::to_value(state)?)
    }
}
