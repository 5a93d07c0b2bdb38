//! Hardware keyring: accounts live on a device reached through the bridge
//!
//! The keyring only stores derivation indexes and the brand of each account;
//! the brand picks the bridge target. Every signature returned by a device is
//! checked against the expected account before it is handed back.

use super::{index_after, KeyringAdapter, KeyringContext, SignerRef};
use crate::bridge::{
    field_str, BridgeClient, ACTION_GET_ADDRESS, ACTION_SIGN_PERSONAL_MESSAGE,
    ACTION_SIGN_TRANSACTION, ACTION_SIGN_TYPED_DATA,
};
use crate::types::{
    normalize_address, personal_message_hash, Account, KeyringType, Signature, TransactionRequest,
    TypedDataRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// An account held on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareAccount {
    /// Normalized address
    pub address: String,
    /// Derivation index under the keyring's path
    pub index: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardwareState {
    hd_path: String,
    accounts: Vec<HardwareAccount>,
    #[serde(default)]
    brands: HashMap<String, String>,
}

/// Keyring backed by hardware devices
pub struct HardwareKeyring {
    hd_path: String,
    default_brand: String,
    accounts: RwLock<Vec<HardwareAccount>>,
    /// address -> brand
    brands: RwLock<HashMap<String, String>>,
    bridge: Option<Arc<BridgeClient>>,
}

/// Bridge target for a brand
fn target_for(brand: &str) -> String {
    brand.to_ascii_lowercase()
}

impl HardwareKeyring {
    /// Empty keyring
    pub fn new(ctx: &KeyringContext) -> Self {
        Self {
            hd_path: ctx.config.hd_path.clone(),
            default_brand: ctx.config.default_hardware_brand.clone(),
            accounts: RwLock::new(Vec::new()),
            brands: RwLock::new(HashMap::new()),
            bridge: ctx.bridge.clone(),
        }
    }

    /// Rebuild from persisted state, backfilling missing brands with the default
    pub fn deserialize(data: &Value, ctx: &KeyringContext) -> Result<Self> {
        let state: HardwareState = serde_json::from_value(data.clone())
            .map_err(|e| Error::Deserialization(format!("hardware keyring: {}", e)))?;

        let keyring = Self::new(ctx);
        let mut brands = HashMap::with_capacity(state.accounts.len());
        let mut accounts = Vec::with_capacity(state.accounts.len());
        for account in state.accounts {
            let address = normalize_address(&account.address)?;
            let brand = state
                .brands
                .iter()
                .find(|(a, _)| normalize_address(a).ok().as_deref() == Some(address.as_str()))
                .map(|(_, b)| b.clone())
                .unwrap_or_else(|| keyring.default_brand.clone());
            brands.insert(address.clone(), brand);
            accounts.push(HardwareAccount {
                address,
                index: account.index,
            });
        }

        Ok(Self {
            hd_path: state.hd_path,
            accounts: RwLock::new(accounts),
            brands: RwLock::new(brands),
            ..keyring
        })
    }

    /// Brand of an account
    pub fn brand_of(&self, address: &str) -> Option<String> {
        self.brands.read().get(address).cloned()
    }

    fn bridge(&self) -> Result<&BridgeClient> {
        self.bridge
            .as_deref()
            .ok_or_else(|| Error::TransportUnavailable("no hardware bridge configured".into()))
    }

    fn path(&self, index: u32) -> String {
        format!("{}/{}", self.hd_path, index)
    }

    /// Import the accounts at `indexes` from the `brand` device
    pub async fn add_indexes(&self, brand: &str, indexes: &[u32]) -> Result<Vec<String>> {
        let bridge = self.bridge()?;
        let target = target_for(brand);
        let mut added = Vec::with_capacity(indexes.len());

        for &index in indexes {
            let fields = bridge
                .call(&target, ACTION_GET_ADDRESS, vec![json!(self.path(index))])
                .await?;
            let address = normalize_address(field_str(&fields, "address")?)?;

            let mut accounts = self.accounts.write();
            if accounts.iter().any(|a| a.address == address) || added.contains(&address) {
                return Err(Error::DuplicateAccount(address));
            }
            accounts.push(HardwareAccount {
                address: address.clone(),
                index,
            });
            self.brands.write().insert(address.clone(), brand.to_string());
            added.push(address);
        }

        info!(brand, count = added.len(), "Imported hardware accounts");
        Ok(added)
    }

    fn locate(&self, signer: SignerRef<'_>) -> Result<(u32, String)> {
        let address = normalize_address(signer.address)?;
        let index = self
            .accounts
            .read()
            .iter()
            .find(|a| a.address == address)
            .map(|a| a.index)
            .ok_or(Error::NoKeyringFound)?;
        let brand = self
            .brand_of(&address)
            .unwrap_or_else(|| self.default_brand.clone());
        if let Some(wanted) = signer.brand {
            if wanted != brand {
                return Err(Error::NoKeyringFound);
            }
        }
        Ok((index, brand))
    }

    async fn sign_on_device(
        &self,
        signer: SignerRef<'_>,
        action: &str,
        mut params: Vec<Value>,
        prehash: [u8; 32],
    ) -> Result<Signature> {
        let (index, brand) = self.locate(signer)?;
        params.insert(0, json!(self.path(index)));

        let fields = self.bridge()?.call(&target_for(&brand), action, params).await?;
        let signature = Signature::from_hex(field_str(&fields, "signature")?)?;

        let expected = normalize_address(signer.address)?;
        if signature.recover_address(&prehash)? != expected {
            warn!(brand = %brand, index, "Device signed with an unexpected key");
            return Err(Error::Bridge(
                "signature does not match the requested account".into(),
            ));
        }
        Ok(signature)
    }
}

#[async_trait]
impl KeyringAdapter for HardwareKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::Hardware
    }

    fn accounts(&self) -> Vec<Account> {
        let accounts = self.accounts.read();
        let brands = self.brands.read();
        accounts
            .iter()
            .map(|a| {
                let brand = brands
                    .get(&a.address)
                    .cloned()
                    .unwrap_or_else(|| self.default_brand.clone());
                Account::new(a.address.clone(), KeyringType::Hardware).with_brand(brand)
            })
            .collect()
    }

    async fn add_accounts(&self, count: usize) -> Result<Vec<String>> {
        let (next, brand) = {
            let accounts = self.accounts.read();
            let next = match accounts.iter().map(|a| a.index).max() {
                Some(last) => index_after(last)?,
                None => 0,
            };
            let brand = accounts
                .last()
                .and_then(|a| self.brand_of(&a.address))
                .unwrap_or_else(|| self.default_brand.clone());
            (next, brand)
        };
        let mut indexes = Vec::new();
        let mut index = next;
        for position in 0..count {
            if position > 0 {
                index = index_after(index)?;
            }
            indexes.push(index);
        }
        self.add_indexes(&brand, &indexes).await
    }

    async fn remove_account(&self, address: &str, brand: Option<&str>) -> Result<()> {
        let address = normalize_address(address)?;
        if let Some(wanted) = brand {
            if self.brand_of(&address).as_deref() != Some(wanted) {
                return Err(Error::NoKeyringFound);
            }
        }

        let mut accounts = self.accounts.write();
        let before = accounts.len();
        accounts.retain(|a| a.address != address);
        if accounts.len() == before {
            return Err(Error::NoKeyringFound);
        }
        self.brands.write().remove(&address);
        Ok(())
    }

    async fn sign_transaction(
        &self,
        signer: SignerRef<'_>,
        tx: &TransactionRequest,
    ) -> Result<Signature> {
        let params = vec![
            json!(format!("0x{}", hex::encode(&tx.unsigned_tx))),
            json!(tx.chain_id),
        ];
        self.sign_on_device(signer, ACTION_SIGN_TRANSACTION, params, tx.signing_hash())
            .await
    }

    async fn sign_personal_message(
        &self,
        signer: SignerRef<'_>,
        message: &[u8],
    ) -> Result<Signature> {
        let params = vec![json!(format!("0x{}", hex::encode(message)))];
        self.sign_on_device(
            signer,
            ACTION_SIGN_PERSONAL_MESSAGE,
            params,
            personal_message_hash(message),
        )
        .await
    }

    async fn sign_typed_data(
        &self,
        signer: SignerRef<'_>,
        data: &TypedDataRequest,
    ) -> Result<Signature> {
        let params = vec![
            json!(format!("0x{}", hex::encode(data.domain_separator))),
            json!(format!("0x{}", hex::encode(data.struct_hash))),
            data.data.clone(),
        ];
        self.sign_on_device(signer, ACTION_SIGN_TYPED_DATA, params, data.signing_hash())
            .await
    }

    fn serialize(&self) -> Result<Value> {
        let state = HardwareState {
            hd_path: self.hd_path.clone(),
            accounts: self.accounts.read().clone(),
            brands: self.brands.read().clone(),
        };
        Ok(serde_json::to_value(state)?)
    }
}
