//! Keyring service: lock state, vault persistence and operation routing
//!
//! # Lock states
//!
//! ```text
//! Uninitialized --boot--> Unlocked <--submit_password / set_locked--> Locked
//! ```
//!
//! Every mutating operation holds the state write lock for its whole
//! duration and persists the vault before releasing it. Signing only holds
//! the read lock long enough to resolve the keyring.

use crate::bridge::{BridgeChannel, BridgeClient};
use crate::config::KeyringConfig;
use crate::event::KeyringEvent;
use crate::keyring::{Keyring, KeyringContext, KeyringOptions, KeyringRecord, SignerRef};
use crate::registry::{AccountFilter, KeyringHandle, KeyringInfo, KeyringRegistry};
use crate::session::{SessionManager, SessionManagerConfig, SessionTransport};
use crate::types::{normalize_address, Account, KeyringType, Signature, TransactionRequest, TypedDataRequest};
use crate::vault::{self, EncryptedBlob, EncryptedVault, VaultStore};
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Lock state of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    /// No vault has been booted
    Uninitialized,
    /// Vault exists, secrets not in memory
    Locked,
    /// Vault decrypted, keyrings live
    Unlocked,
}

#[derive(Default)]
struct ServiceState {
    password: Option<Zeroizing<String>>,
    registry: KeyringRegistry,
}

/// Run CPU-heavy work (KDF, AEAD) on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

/// Whether a new account collides with an existing one
fn collides(existing: &Account, new: &Account) -> bool {
    if existing.address != new.address {
        return false;
    }
    if existing.keyring_type.is_vault_held() && new.keyring_type.is_vault_held() {
        return true;
    }
    existing.keyring_type == new.keyring_type && existing.brand_name == new.brand_name
}

/// Builder for [`KeyringService`]
pub struct KeyringServiceBuilder {
    store: Arc<dyn VaultStore>,
    config: KeyringConfig,
    bridge: Option<Arc<dyn BridgeChannel>>,
    transport: Option<Arc<dyn SessionTransport>>,
}

impl KeyringServiceBuilder {
    /// Set the configuration
    pub fn config(mut self, config: KeyringConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect hardware keyrings to a bridge host
    pub fn bridge(mut self, channel: Arc<dyn BridgeChannel>) -> Self {
        self.bridge = Some(channel);
        self
    }

    /// Connect WalletConnect keyrings to a session relay
    pub fn session_transport(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> KeyringService {
        let config = Arc::new(self.config);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let bridge = self.bridge.map(|channel| {
            let timeout = config.bridge_connect_timeout() + config.bridge_request_timeout();
            Arc::new(BridgeClient::new(channel, timeout))
        });
        let sessions = self.transport.map(|transport| {
            Arc::new(SessionManager::with_events(
                transport,
                SessionManagerConfig::from(config.as_ref()),
                events.clone(),
            ))
        });

        KeyringService {
            context: KeyringContext {
                config: config.clone(),
                bridge,
                sessions,
            },
            config,
            store: self.store,
            state: RwLock::new(ServiceState::default()),
            events,
        }
    }
}

/// Custody service over every keyring in the vault
pub struct KeyringService {
    config: Arc<KeyringConfig>,
    store: Arc<dyn VaultStore>,
    context: KeyringContext,
    state: RwLock<ServiceState>,
    events: broadcast::Sender<KeyringEvent>,
}

impl KeyringService {
    /// Start building a service persisting to `store`
    pub fn builder(store: Arc<dyn VaultStore>) -> KeyringServiceBuilder {
        KeyringServiceBuilder {
            store,
            config: KeyringConfig::default(),
            bridge: None,
            transport: None,
        }
    }

    /// Software-only service
    pub fn new(store: Arc<dyn VaultStore>, config: KeyringConfig) -> Self {
        Self::builder(store).config(config).build()
    }

    pub fn config(&self) -> &KeyringConfig {
        &self.config
    }

    /// Remote session manager, when a transport is configured
    pub fn sessions(&self) -> Option<&SessionManager> {
        self.context.sessions.as_deref()
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<KeyringEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: KeyringEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_accounts(&self, state: &ServiceState) {
        let accounts = state.registry.accounts().into_iter().map(|a| a.address).collect();
        self.emit(KeyringEvent::AccountsChanged { accounts });
    }

    fn ensure_unlocked(state: &ServiceState) -> Result<()> {
        if state.password.is_none() {
            return Err(Error::VaultLocked);
        }
        Ok(())
    }

    async fn seal(&self, password: Zeroizing<String>, records: Vec<KeyringRecord>) -> Result<EncryptedVault> {
        let kdf = self.config.kdf;
        blocking(move || vault::encrypt_with_password(&password, &records, &kdf)).await
    }

    async fn unseal(&self, password: &str, sealed: EncryptedVault) -> Result<Vec<KeyringRecord>> {
        let password = Zeroizing::new(password.to_string());
        blocking(move || vault::decrypt_with_password(&password, &sealed)).await
    }

    /// Serialize every keyring in registry order, encrypt, overwrite the stored vault
    async fn persist(&self, state: &ServiceState) -> Result<()> {
        let password = state.password.clone().ok_or(Error::VaultLocked)?;
        let records = state.registry.to_records()?;
        let count = records.len();
        let sealed = self.seal(password, records).await?;
        self.store.save(&sealed).await?;
        debug!(keyrings = count, "Vault persisted");
        Ok(())
    }

    // ============ Lock State ============

    /// Create the first, empty vault and leave the service unlocked
    #[instrument(skip_all)]
    pub async fn boot(&self, password: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if self.store.load().await?.is_some() {
            return Err(Error::AlreadyBooted);
        }

        let password = Zeroizing::new(password.to_string());
        let sealed = self.seal(password.clone(), Vec::new()).await?;
        self.store.save(&sealed).await?;

        state.password = Some(password);
        state.registry = KeyringRegistry::new();
        info!("Vault booted");
        self.emit(KeyringEvent::Unlocked);
        Ok(())
    }

    /// Decrypt the vault and rebuild every keyring
    ///
    /// All-or-nothing: on failure the previous registry and lock state stay.
    #[instrument(skip_all)]
    pub async fn submit_password(&self, password: &str) -> Result<Vec<Account>> {
        let mut state = self.state.write().await;
        let sealed = self.store.load().await?.ok_or(Error::CanNotUnlock)?;

        let records = match self.unseal(password, sealed).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Unlock failed");
                return Err(e);
            }
        };

        let mut registry = KeyringRegistry::new();
        for record in &records {
            registry.push(Keyring::from_record(record, &self.context)?);
        }

        let previous = std::mem::replace(&mut state.registry, registry).drain();
        for handle in previous {
            handle.keyring.adapter().shutdown().await;
        }
        state.password = Some(Zeroizing::new(password.to_string()));

        let accounts = state.registry.accounts();
        info!(keyrings = state.registry.len(), accounts = accounts.len(), "Keyrings unlocked");
        self.emit(KeyringEvent::Unlocked);
        Ok(accounts)
    }

    /// Alias of [`submit_password`](Self::submit_password)
    pub async fn unlock_keyrings(&self, password: &str) -> Result<Vec<Account>> {
        self.submit_password(password).await
    }

    /// Drop the password and every keyring, tearing down live connections
    #[instrument(skip_all)]
    pub async fn set_locked(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.password = None;

        for handle in state.registry.drain() {
            handle.keyring.adapter().shutdown().await;
        }
        if let Some(sessions) = &self.context.sessions {
            sessions.disconnect_all().await;
        }
        if let Some(bridge) = &self.context.bridge {
            if let Err(e) = bridge.release().await {
                debug!(error = %e, "Bridge release failed");
            }
        }

        info!("Keyrings locked");
        self.emit(KeyringEvent::Locked);
        Ok(())
    }

    /// Check `password` against the stored vault without touching lock state
    #[instrument(skip_all)]
    pub async fn verify_password(&self, password: &str) -> Result<()> {
        let sealed = self.store.load().await?.ok_or(Error::CanNotUnlock)?;
        let password = Zeroizing::new(password.to_string());
        blocking(move || sealed.open(&password).map(drop)).await
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.read().await.password.is_some()
    }

    pub async fn lock_state(&self) -> Result<LockState> {
        if self.is_unlocked().await {
            return Ok(LockState::Unlocked);
        }
        Ok(match self.store.load().await? {
            Some(_) => LockState::Locked,
            None => LockState::Uninitialized,
        })
    }

    // ============ Keyring Management ============

    /// Create a keyring of `keyring_type` from `options` and persist it
    #[instrument(skip(self, options))]
    pub async fn add_new_keyring(
        &self,
        keyring_type: KeyringType,
        options: KeyringOptions,
    ) -> Result<KeyringInfo> {
        let mut state = self.state.write().await;
        Self::ensure_unlocked(&state)?;

        let keyring = Keyring::from_options(keyring_type, options, &self.context).await?;
        let existing = state.registry.accounts();
        if let Some(dup) = keyring
            .adapter()
            .accounts()
            .into_iter()
            .find(|new| existing.iter().any(|old| collides(old, new)))
        {
            keyring.adapter().shutdown().await;
            return Err(Error::DuplicateAccount(dup.address));
        }

        let handle = state.registry.push(keyring);
        if let Err(e) = self.persist(&state).await {
            state.registry.remove(&handle.id);
            return Err(e);
        }

        let info = handle.info();
        info!(keyring_id = %info.id, accounts = info.accounts.len(), "Keyring added");
        self.emit_accounts(&state);
        Ok(info)
    }

    /// Add one account to the keyring `keyring_id`
    #[instrument(skip(self))]
    pub async fn add_new_account(&self, keyring_id: &Uuid) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        Self::ensure_unlocked(&state)?;

        let handle = state.registry.get(keyring_id).ok_or(Error::NoKeyringFound)?;
        let adapter = handle.keyring.adapter();
        let added = adapter.add_accounts(1).await?;

        let others: Vec<Account> = state
            .registry
            .handles()
            .iter()
            .filter(|h| h.id != handle.id)
            .flat_map(|h| h.keyring.adapter().accounts())
            .collect();
        let fresh: Vec<Account> = adapter
            .accounts()
            .into_iter()
            .filter(|a| added.contains(&a.address))
            .collect();

        let duplicate = fresh
            .iter()
            .find(|new| others.iter().any(|old| collides(old, new)))
            .map(|a| a.address.clone());
        let outcome = match duplicate {
            Some(address) => Err(Error::DuplicateAccount(address)),
            None => self.persist(&state).await,
        };
        if let Err(e) = outcome {
            for address in &added {
                let _ = adapter.remove_account(address, None).await;
            }
            return Err(e);
        }

        info!(count = added.len(), "Account added");
        self.emit_accounts(&state);
        Ok(added)
    }

    /// Remove an account; a keyring left empty is evicted
    #[instrument(skip(self))]
    pub async fn remove_account(
        &self,
        address: &str,
        keyring_type: KeyringType,
        brand: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        Self::ensure_unlocked(&state)?;

        let filter = AccountFilter {
            keyring_type: Some(keyring_type),
            brand: brand.map(str::to_string),
        };
        let handle = state.registry.resolve(Some(address), &filter)?;
        let address = normalize_address(address)?;
        let position = state.registry.position(&handle.id).ok_or(Error::NoKeyringFound)?;
        let snapshot = handle.keyring.to_record()?;

        let adapter = handle.keyring.adapter();
        adapter.remove_account(&address, brand).await?;
        let evicted = adapter.account_count() == 0;
        if evicted {
            state.registry.remove(&handle.id);
        }

        if let Err(e) = self.persist(&state).await {
            warn!(error = %e, "Persist failed, restoring keyring");
            let restored = Keyring::from_record(&snapshot, &self.context)?;
            state.registry.restore(handle.id, position, restored);
            return Err(e);
        }

        if evicted {
            adapter.shutdown().await;
            info!(keyring_id = %handle.id, "Empty keyring evicted");
        }
        info!(address = %address, "Account removed");
        self.emit_accounts(&state);
        Ok(())
    }

    /// Addresses of every keyring, in keyring order (not deduplicated)
    pub async fn get_accounts(&self) -> Vec<String> {
        self.get_accounts_detailed()
            .await
            .into_iter()
            .map(|a| a.address)
            .collect()
    }

    /// Accounts with type and brand
    pub async fn get_accounts_detailed(&self) -> Vec<Account> {
        self.state.read().await.registry.accounts()
    }

    /// Summaries of every keyring
    pub async fn get_keyrings(&self) -> Vec<KeyringInfo> {
        let state = self.state.read().await;
        state.registry.handles().iter().map(KeyringHandle::info).collect()
    }

    /// First keyring (insertion order) owning `address` under `filter`
    pub async fn get_keyring_for_account(
        &self,
        address: Option<&str>,
        filter: &AccountFilter,
    ) -> Result<KeyringHandle> {
        self.state.read().await.registry.resolve(address, filter)
    }

    // ============ Signing ============

    async fn signer(&self, address: &str, filter: &AccountFilter) -> Result<(KeyringHandle, String)> {
        let state = self.state.read().await;
        Self::ensure_unlocked(&state)?;
        let handle = state.registry.resolve(Some(address), filter)?;
        Ok((handle, normalize_address(address)?))
    }

    /// Sign a transaction with the keyring owning `address`
    #[instrument(skip(self, tx, filter), fields(request_id = %tx.request_id))]
    pub async fn sign_transaction(
        &self,
        address: &str,
        tx: &TransactionRequest,
        filter: &AccountFilter,
    ) -> Result<Signature> {
        let (handle, address) = self.signer(address, filter).await?;
        let signer = SignerRef::with_brand(&address, filter.brand.as_deref());
        let signature = handle.keyring.adapter().sign_transaction(signer, tx).await?;
        info!(keyring = %handle.keyring.keyring_type(), "Transaction signed");
        Ok(signature)
    }

    /// Sign an EIP-191 personal message
    #[instrument(skip(self, message, filter), fields(len = message.len()))]
    pub async fn sign_personal_message(
        &self,
        address: &str,
        message: &[u8],
        filter: &AccountFilter,
    ) -> Result<Signature> {
        let (handle, address) = self.signer(address, filter).await?;
        let signer = SignerRef::with_brand(&address, filter.brand.as_deref());
        handle.keyring.adapter().sign_personal_message(signer, message).await
    }

    /// Sign EIP-712 typed data
    #[instrument(skip(self, data, filter))]
    pub async fn sign_typed_data(
        &self,
        address: &str,
        data: &TypedDataRequest,
        filter: &AccountFilter,
    ) -> Result<Signature> {
        let (handle, address) = self.signer(address, filter).await?;
        let signer = SignerRef::with_brand(&address, filter.brand.as_deref());
        handle.keyring.adapter().sign_typed_data(signer, data).await
    }

    // ============ Export ============

    /// Export the private key of `address`; the password is checked again
    #[instrument(skip(self, password))]
    pub async fn export_private_key(&self, address: &str, password: &str) -> Result<Zeroizing<String>> {
        self.verify_password(password).await?;
        let (handle, address) = self.signer(address, &AccountFilter::any()).await?;
        let key = handle.keyring.adapter().export_account(&address)?;
        warn!(address = %address, "Private key exported");
        Ok(key)
    }

    /// Export the mnemonic of the keyring owning `address`; the password is checked again
    #[instrument(skip(self, password))]
    pub async fn export_mnemonic(&self, address: &str, password: &str) -> Result<Zeroizing<String>> {
        self.verify_password(password).await?;
        let (handle, _) = self.signer(address, &AccountFilter::of_type(KeyringType::HdKeyTree)).await?;
        let phrase = handle.keyring.adapter().export_mnemonic()?;
        warn!(keyring_id = %handle.id, "Mnemonic exported");
        Ok(phrase)
    }

    // ============ Password-Gated Blobs ============

    /// Encrypt any serializable value under `password`
    pub async fn encrypt_with_password<T: Serialize + ?Sized>(
        &self,
        password: &str,
        value: &T,
    ) -> Result<EncryptedBlob> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        let password = Zeroizing::new(password.to_string());
        let kdf = self.config.kdf;
        blocking(move || EncryptedBlob::seal(&password, &plaintext, &kdf)).await
    }

    /// Decrypt a blob produced by [`encrypt_with_password`](Self::encrypt_with_password)
    pub async fn decrypt_with_password<T: DeserializeOwned + Send + 'static>(
        &self,
        password: &str,
        blob: &EncryptedBlob,
    ) -> Result<T> {
        let password = Zeroizing::new(password.to_string());
        let blob = blob.clone();
        blocking(move || vault::decrypt_with_password(&password, &blob)).await
    }
}
