//! Keyring adapters
//!
//! Every backend implements [`KeyringAdapter`]: enumerate accounts, add and
//! remove accounts, sign transactions / personal messages / typed data,
//! serialize. Capabilities a backend cannot provide fail with
//! [`Error::NotSupported`](crate::Error::NotSupported).
//!
//! The set of backends is closed. [`Keyring`] holds one variant per
//! [`KeyringType`] and reconstruction from a vault record is an exhaustive
//! match on the type tag.
//!
//! | Type | Authority | Module |
//! |------|-----------|--------|
//! | Simple Key Pair | private keys in memory | [`simple`] |
//! | HD Key Tree | BIP-39 seed in memory | [`hd`] |
//! | Hardware | device behind the bridge | [`hardware`] |
//! | WalletConnect | peer wallet over a remote session | [`walletconnect`] |
//! | Watch Address | none | [`watch`] |

pub mod hardware;
pub mod hd;
pub mod simple;
pub mod walletconnect;
pub mod watch;

pub use hardware::{HardwareAccount, HardwareKeyring};
pub use hd::HdKeyring;
pub use simple::SimpleKeyring;
pub use walletconnect::{RemoteAccount, WalletConnectKeyring};
pub use watch::WatchKeyring;

use crate::bridge::BridgeClient;
use crate::config::KeyringConfig;
use crate::session::SessionManager;
use crate::types::{Account, KeyringType, Signature, TransactionRequest, TypedDataRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Derivation index following `index`
pub(crate) fn index_after(index: u32) -> Result<u32> {
    index
        .checked_add(1)
        .ok_or_else(|| Error::InvalidOptions("derivation index space exhausted".into()))
}

/// Account selected for a signing call
#[derive(Debug, Clone, Copy)]
pub struct SignerRef<'a> {
    /// Normalized address
    pub address: &'a str,
    /// Brand to sign through, when the keyring holds the address under several
    pub brand: Option<&'a str>,
}

impl<'a> SignerRef<'a> {
    /// Signer without brand preference
    pub fn new(address: &'a str) -> Self {
        Self {
            address,
            brand: None,
        }
    }

    /// Signer pinned to a brand
    pub fn with_brand(address: &'a str, brand: Option<&'a str>) -> Self {
        Self { address, brand }
    }
}

/// Capability contract shared by every keyring backend
#[async_trait]
pub trait KeyringAdapter: Send + Sync {
    /// Backend type tag
    fn keyring_type(&self) -> KeyringType;

    /// Accounts in the keyring's own order
    fn accounts(&self) -> Vec<Account>;

    /// Whether the keyring owns `address` (normalized), optionally under `brand`
    fn has_account(&self, address: &str, brand: Option<&str>) -> bool {
        self.accounts().iter().any(|a| {
            a.address == address && brand.map_or(true, |b| a.brand_name.as_deref() == Some(b))
        })
    }

    /// Number of accounts held
    fn account_count(&self) -> usize {
        self.accounts().len()
    }

    /// Create `count` new accounts, returning their addresses
    async fn add_accounts(&self, count: usize) -> Result<Vec<String>>;

    /// Remove an account (all brands when `brand` is `None`)
    async fn remove_account(&self, address: &str, brand: Option<&str>) -> Result<()>;

    /// Sign a transaction
    async fn sign_transaction(
        &self,
        signer: SignerRef<'_>,
        tx: &TransactionRequest,
    ) -> Result<Signature>;

    /// Sign an EIP-191 personal message
    async fn sign_personal_message(&self, signer: SignerRef<'_>, message: &[u8])
        -> Result<Signature>;

    /// Sign EIP-712 typed data
    async fn sign_typed_data(
        &self,
        signer: SignerRef<'_>,
        data: &TypedDataRequest,
    ) -> Result<Signature>;

    /// Export the raw private key (hex) of an account
    fn export_account(&self, _address: &str) -> Result<Zeroizing<String>> {
        Err(Error::not_supported(self.keyring_type(), "exportAccount"))
    }

    /// Export the mnemonic phrase backing the keyring
    fn export_mnemonic(&self) -> Result<Zeroizing<String>> {
        Err(Error::not_supported(self.keyring_type(), "exportMnemonic"))
    }

    /// Adapter-defined persisted state
    fn serialize(&self) -> Result<serde_json::Value>;

    /// Release live resources (remote sessions) before the keyring is dropped
    async fn shutdown(&self) {}
}

/// One entry of the decrypted vault
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyringRecord {
    /// Keyring type tag
    #[serde(rename = "type")]
    pub keyring_type: String,
    /// Adapter-defined state
    pub data: serde_json::Value,
}

impl fmt::Debug for KeyringRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringRecord")
            .field("keyring_type", &self.keyring_type)
            .field("data", &"[REDACTED]")
            .finish()
    }
}

/// Shared handles every keyring may need at construction time
#[derive(Clone)]
pub struct KeyringContext {
    /// Service configuration
    pub config: Arc<KeyringConfig>,
    /// Hardware bridge, if the host provides one
    pub bridge: Option<Arc<BridgeClient>>,
    /// Remote session manager, if the host provides a transport
    pub sessions: Option<Arc<SessionManager>>,
}

impl KeyringContext {
    /// Context without hardware or remote backends
    pub fn software_only(config: Arc<KeyringConfig>) -> Self {
        Self {
            config,
            bridge: None,
            sessions: None,
        }
    }
}

/// Options for creating a keyring through `add_new_keyring`
pub enum KeyringOptions {
    /// Empty keyring (only meaningful for types that can add accounts themselves)
    Empty,
    /// Import raw private keys (hex)
    PrivateKeys(Vec<Zeroizing<String>>),
    /// Import (or generate when `phrase` is `None`) an HD mnemonic
    Mnemonic {
        phrase: Option<Zeroizing<String>>,
        passphrase: Option<Zeroizing<String>>,
        accounts: usize,
    },
    /// Pick accounts by index on a hardware device
    Hardware { brand: String, indexes: Vec<u32> },
    /// Accounts reachable through remote sessions
    Remote { accounts: Vec<RemoteAccount> },
    /// Watch-only addresses
    Watch { addresses: Vec<String> },
}

impl fmt::Debug for KeyringOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyringOptions::Empty => write!(f, "Empty"),
            KeyringOptions::PrivateKeys(keys) => write!(f, "PrivateKeys([REDACTED; {}])", keys.len()),
            KeyringOptions::Mnemonic { phrase, accounts, .. } => f
                .debug_struct("Mnemonic")
                .field("phrase", &phrase.as_ref().map(|_| "[REDACTED]"))
                .field("accounts", accounts)
                .finish(),
            KeyringOptions::Hardware { brand, indexes } => f
                .debug_struct("Hardware")
                .field("brand", brand)
                .field("indexes", indexes)
                .finish(),
            KeyringOptions::Remote { accounts } => {
                f.debug_struct("Remote").field("accounts", accounts).finish()
            }
            KeyringOptions::Watch { addresses } => {
                f.debug_struct("Watch").field("addresses", addresses).finish()
            }
        }
    }
}

/// A keyring instance, one variant per backend
pub enum Keyring {
    SimpleKeyPair(SimpleKeyring),
    HdKeyTree(HdKeyring),
    Hardware(HardwareKeyring),
    WalletConnect(WalletConnectKeyring),
    WatchAddress(WatchKeyring),
}

impl Keyring {
    /// The backend behind this keyring
    pub fn adapter(&self) -> &dyn KeyringAdapter {
        match self {
            Keyring::SimpleKeyPair(k) => k,
            Keyring::HdKeyTree(k) => k,
            Keyring::Hardware(k) => k,
            Keyring::WalletConnect(k) => k,
            Keyring::WatchAddress(k) => k,
        }
    }

    /// Backend type tag
    pub fn keyring_type(&self) -> KeyringType {
        self.adapter().keyring_type()
    }

    /// Build a keyring of `keyring_type` seeded from `options`
    pub async fn from_options(
        keyring_type: KeyringType,
        options: KeyringOptions,
        ctx: &KeyringContext,
    ) -> Result<Keyring> {
        let mismatch = |options: &KeyringOptions| {
            Error::InvalidOptions(format!("{:?} cannot seed a {} keyring", options, keyring_type))
        };

        let keyring = match (keyring_type, options) {
            (KeyringType::SimpleKeyPair, KeyringOptions::PrivateKeys(keys)) => {
                Keyring::SimpleKeyPair(SimpleKeyring::from_private_keys(&keys)?)
            }
            (KeyringType::SimpleKeyPair, KeyringOptions::Empty) => {
                let keyring = SimpleKeyring::new();
                keyring.add_accounts(1).await?;
                Keyring::SimpleKeyPair(keyring)
            }
            (
                KeyringType::HdKeyTree,
                KeyringOptions::Mnemonic {
                    phrase,
                    passphrase,
                    accounts,
                },
            ) => {
                ctx.config.check_account_batch(accounts)?;
                let passphrase = passphrase.as_ref().map(|p| p.as_str());
                let keyring = match phrase {
                    Some(phrase) => {
                        HdKeyring::from_phrase(&phrase, passphrase, &ctx.config.hd_path)?
                    }
                    None => HdKeyring::generate(passphrase, &ctx.config.hd_path)?,
                };
                keyring.add_accounts(accounts).await?;
                Keyring::HdKeyTree(keyring)
            }
            (KeyringType::HdKeyTree, KeyringOptions::Empty) => {
                let keyring = HdKeyring::generate(None, &ctx.config.hd_path)?;
                keyring.add_accounts(1).await?;
                Keyring::HdKeyTree(keyring)
            }
            (KeyringType::Hardware, KeyringOptions::Hardware { brand, indexes }) => {
                ctx.config.check_account_batch(indexes.len())?;
                let keyring = HardwareKeyring::new(ctx);
                keyring.add_indexes(&brand, &indexes).await?;
                Keyring::Hardware(keyring)
            }
            (KeyringType::WalletConnect, KeyringOptions::Remote { accounts }) => {
                let keyring = WalletConnectKeyring::new(ctx);
                keyring.add_remote_accounts(accounts)?;
                Keyring::WalletConnect(keyring)
            }
            (KeyringType::WatchAddress, KeyringOptions::Watch { addresses }) => {
                let keyring = WatchKeyring::new();
                keyring.add_addresses(&addresses)?;
                Keyring::WatchAddress(keyring)
            }
            (_, options) => return Err(mismatch(&options)),
        };

        if keyring.adapter().account_count() == 0 {
            keyring.adapter().shutdown().await;
            return Err(Error::InvalidOptions(format!(
                "a new {} keyring needs at least one account",
                keyring_type
            )));
        }
        Ok(keyring)
    }

    /// Rebuild a keyring from its vault record
    pub fn from_record(record: &KeyringRecord, ctx: &KeyringContext) -> Result<Keyring> {
        let keyring_type: KeyringType = record.keyring_type.parse()?;
        let data = &record.data;

        let keyring = match keyring_type {
            KeyringType::SimpleKeyPair => Keyring::SimpleKeyPair(SimpleKeyring::deserialize(data)?),
            KeyringType::HdKeyTree => Keyring::HdKeyTree(HdKeyring::deserialize(data)?),
            KeyringType::Hardware => Keyring::Hardware(HardwareKeyring::deserialize(data, ctx)?),
            KeyringType::WalletConnect => {
                Keyring::WalletConnect(WalletConnectKeyring::deserialize(data, ctx)?)
            }
            KeyringType::WatchAddress => Keyring::WatchAddress(WatchKeyring::deserialize(data)?),
        };

        Ok(keyring)
    }

    /// Vault record for this keyring
    pub fn to_record(&self) -> Result<KeyringRecord> {
        Ok(KeyringRecord {
            keyring_type: self.keyring_type().as_str().to_string(),
            data: self.adapter().serialize()?,
        })
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("type", &self.keyring_type())
            .field("accounts", &self.adapter().account_count())
            .finish()
    }
}
