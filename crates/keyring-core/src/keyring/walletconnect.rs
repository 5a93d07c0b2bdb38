//! WalletConnect keyring: accounts owned by peer wallets reached through remote sessions
//!
//! An address can be held under several brands (peer wallets); each
//! `(address, brand)` pair gets its own session.

use super::{KeyringAdapter, KeyringContext, SignerRef};
use crate::session::{RemoteRequest, SessionKey, SessionManager};
use crate::types::{
    normalize_address, Account, KeyringType, Signature, TransactionRequest, TypedDataRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// An account reachable through a peer wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccount {
    pub address: String,
    pub brand_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl RemoteAccount {
    pub fn new(address: impl Into<String>, brand_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            brand_name: brand_name.into(),
            chain_id: None,
        }
    }

    fn session_key(&self) -> SessionKey {
        SessionKey::new(self.address.clone(), self.brand_name.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct WalletConnectState {
    accounts: Vec<RemoteAccount>,
}

/// Keyring delegating every signature to a peer wallet
pub struct WalletConnectKeyring {
    accounts: RwLock<Vec<RemoteAccount>>,
    sessions: Option<Arc<SessionManager>>,
}

impl WalletConnectKeyring {
    pub fn new(ctx: &KeyringContext) -> Self {
        Self {
            accounts: RwLock::new(Vec::new()),
            sessions: ctx.sessions.clone(),
        }
    }

    pub fn deserialize(data: &serde_json::Value, ctx: &KeyringContext) -> Result<Self> {
        let state: WalletConnectState = serde_json::from_value(data.clone())
            .map_err(|e| Error::Deserialization(format!("WalletConnect keyring: {}", e)))?;
        let keyring = Self::new(ctx);
        keyring.add_remote_accounts(state.accounts)?;
        Ok(keyring)
    }

    /// Add peer accounts; the same address under a new brand is a new account
    pub fn add_remote_accounts(&self, accounts: Vec<RemoteAccount>) -> Result<Vec<String>> {
        let mut held = self.accounts.write();
        let mut added = Vec::with_capacity(accounts.len());

        for account in accounts {
            let account = RemoteAccount {
                address: normalize_address(&account.address)?,
                ..account
            };
            if held
                .iter()
                .any(|a| a.address == account.address && a.brand_name == account.brand_name)
            {
                return Err(Error::DuplicateAccount(format!(
                    "{} ({})",
                    account.address, account.brand_name
                )));
            }
            added.push(account.address.clone());
            held.push(account);
        }
        Ok(added)
    }

    fn sessions(&self) -> Result<&SessionManager> {
        self.sessions
            .as_deref()
            .ok_or_else(|| Error::TransportUnavailable("no session transport configured".into()))
    }

    fn find(&self, signer: SignerRef<'_>) -> Result<RemoteAccount> {
        let address = normalize_address(signer.address)?;
        self.accounts
            .read()
            .iter()
            .find(|a| a.address == address && signer.brand.map_or(true, |b| a.brand_name == b))
            .cloned()
            .ok_or(Error::NoKeyringFound)
    }

    async fn sign_remote(
        &self,
        signer: SignerRef<'_>,
        chain_id: Option<u64>,
        request: RemoteRequest,
    ) -> Result<Signature> {
        let account = self.find(signer)?;
        let prehash = request.signing_hash();
        let signature = self
            .sessions()?
            .sign(&account.session_key(), chain_id.or(account.chain_id), request)
            .await?;

        if signature.recover_address(&prehash)? != account.address {
            warn!(brand = %account.brand_name, "Peer signed with a different account");
            return Err(Error::RemoteUnauthorized(format!(
                "{} signed with another account",
                account.brand_name
            )));
        }
        Ok(signature)
    }
}

#[async_trait]
impl KeyringAdapter for WalletConnectKeyring {
    fn keyring_type(&self) -> KeyringType {
        KeyringType::WalletConnect
    }

    fn accounts(&self) -> Vec<Account> {
        self.accounts
            .read()
            .iter()
            .map(|a| {
                Account::new(a.address.clone(), KeyringType::WalletConnect)
                    .with_brand(a.brand_name.clone())
            })
            .collect()
    }

    async fn add_accounts(&self, _count: usize) -> Result<Vec<String>> {
        Err(Error::not_supported(KeyringType::WalletConnect, "addAccounts"))
    }

    async fn remove_account(&self, address: &str, brand: Option<&str>) -> Result<()> {
        let address = normalize_address(address)?;
        let removed: Vec<RemoteAccount> = {
            let mut held = self.accounts.write();
            let (gone, kept): (Vec<_>, Vec<_>) = held
                .drain(..)
                .partition(|a| a.address == address && brand.map_or(true, |b| a.brand_name == b));
            *held = kept;
            gone
        };
        if removed.is_empty() {
            return Err(Error::NoKeyringFound);
        }

        if let Some(sessions) = self.sessions.as_deref() {
            for account in &removed {
                sessions.disconnect(&account.session_key()).await;
            }
        }
        Ok(())
    }

    async fn sign_transaction(
        &self,
        signer: SignerRef<'_>,
        tx: &TransactionRequest,
    ) -> Result<Signature> {
        self.sign_remote(signer, tx.chain_id, RemoteRequest::SignTransaction(tx.clone()))
            .await
    }

    async fn sign_personal_message(
        &self,
        signer: SignerRef<'_>,
        message: &[u8],
    ) -> Result<Signature> {
        let request = RemoteRequest::PersonalSign {
            address: normalize_address(signer.address)?,
            message: message.to_vec(),
        };
        self.sign_remote(signer, None, request).await
    }

    async fn sign_typed_data(
        &self,
        signer: SignerRef<'_>,
        data: &TypedDataRequest,
    ) -> Result<Signature> {
        let request = RemoteRequest::SignTypedData {
            address: normalize_address(signer.address)?,
            data: data.clone(),
        };
        self.sign_remote(signer, None, request).await
    }

    fn serialize(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(WalletConnectState {
            accounts: self.accounts.read().clone(),
        })?)
    }

    async fn shutdown(&self) {
        let Some(sessions) = self.sessions.as_deref() else {
            return;
        };
        let keys: Vec<SessionKey> = self.accounts.read().iter().map(RemoteAccount::session_key).collect();
        for key in keys {
            sessions.disconnect(&key).await;
        }
    }
}
