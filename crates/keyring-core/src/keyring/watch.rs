//! Watch-only addresses. Every signing capability is refused.

use super::{KeyringAdapter, SignerRef};
use crate::types::{normalize_address, Account, KeyringType, Signature, TransactionRequest, TypedDataRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct WatchState {
    accounts: Vec<String>,
}

/// Keyring of addresses without signing authority
#[derive(Default)]
pub struct WatchKeyring {
    addresses: RwLock<Vec<String>>,
}

impl WatchKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add addresses, rejecting malformed ones and duplicates
    pub fn add_addresses(&self, addresses: &[String]) -> Result<Vec<String>> {
        let normalized = addresses
            .iter()
            .map(|a| normalize_address(a))
            .collect::<Result<Vec<_>>>()?;

        let mut held = self.addresses.write();
        let mut fresh: Vec<String> = Vec::with_capacity(normalized.len());
        for address in normalized {
            if held.contains(&address) || fresh.contains(&address) {
                return Err(Error::DuplicateAccount(address));
            }
            fresh.push(address);
        }
        held.extend(fresh.iter().cloned());
        Ok(fresh)
    }

    pub fn deserialize(data: &serde_json::Value) -> Result<Self> {
        let state: WatchState = serde_json::from_value(data.clone())
            .map_err(|e| Error::Deserialization(format!("watch keyring: {}", e)))?;
        let keyring = Self::new();
        keyring.add_addresses(&state.accounts)?;
        Ok(keyring)
    }
}

#[async_trait]
impl KeyringAdapter for WatchKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::WatchAddress
    }

    fn accounts(&self) -> Vec<Account> {
        self.addresses
            .read()
            .iter()
            .map(|a| Account::new(a.clone(), KeyringType::WatchAddress))
            .collect()
    }

    async fn add_accounts(&self, _count: usize) -> Result<Vec<String>> {
        Err(Error::not_supported(KeyringType::WatchAddress, "addAccounts"))
    }

    async fn remove_account(&self, address: &str, _brand: Option<&str>) -> Result<()> {
        let address = normalize_address(address)?;
        let mut held = self.addresses.write();
        let before = held.len();
        held.retain(|a| *a != address);
        if held.len() == before {
            return Err(Error::NoKeyringFound);
        }
        Ok(())
    }

    async fn sign_transaction(&self, _: SignerRef<'_>, _: &TransactionRequest) -> Result<Signature> {
        Err(Error::not_supported(KeyringType::WatchAddress, "signTransaction"))
    }

    async fn sign_personal_message(&self, _: SignerRef<'_>, _: &[u8]) -> Result<Signature> {
        Err(Error::not_supported(KeyringType::WatchAddress, "signPersonalMessage"))
    }

    async fn sign_typed_data(&self, _: SignerRef<'_>, _: &TypedDataRequest) -> Result<Signature> {
        Err(Error::not_supported(KeyringType::WatchAddress, "signTypedData"))
    }

    fn serialize(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(WatchState {
            accounts: self.addresses.read().clone(),
        })?)
    }
}
