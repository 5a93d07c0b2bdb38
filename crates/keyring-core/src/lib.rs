//! # Keyring Core
//!
//! Password-gated custody of Ethereum signing keys behind one service.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Vault**: every keyring serialized into one Argon2id + ChaCha20-Poly1305 sealed record
//! - **Keyrings**: simple key pairs, HD mnemonic trees, hardware devices, remote sessions and watch-only addresses behind one adapter trait
//! - **Registry**: ordered keyring collection with deterministic account resolution
//! - **Hardware Bridge**: request/response envelopes to an isolated device host, one command per device at a time
//! - **Remote Sessions**: per-account session lifecycle with a monotonic status latch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keyring_core::{AccountFilter, KeyringOptions, KeyringService, KeyringType};
//! use keyring_core::vault::MemoryVaultStore;
//! use std::sync::Arc;
//!
//! let service = KeyringService::builder(Arc::new(MemoryVaultStore::new())).build();
//! service.boot("correct horse").await?;
//!
//! let info = service
//!     .add_new_keyring(KeyringType::HdKeyTree, KeyringOptions::Empty)
//!     .await?;
//! let address = &info.accounts[0].address;
//!
//! let signature = service
//!     .sign_personal_message(address, b"hello", &AccountFilter::any())
//!     .await?;
//!
//! service.set_locked().await?;
//! ```
//!
//! ## Security Model
//!
//! - Secrets exist in memory only while unlocked; locking drops every keyring
//! - The vault is rewritten after every mutation with a fresh salt and nonce
//! - Exports check the password again even while unlocked
//! - Signatures from devices and remote peers are checked against the expected account

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod keyring;
pub mod registry;
pub mod service;
pub mod session;
pub mod types;
pub mod vault;

pub use config::KeyringConfig;
pub use error::{Error, Result};
pub use event::KeyringEvent;
pub use keyring::{Keyring, KeyringAdapter, KeyringOptions, KeyringRecord, RemoteAccount};
pub use registry::{AccountFilter, KeyringHandle, KeyringInfo, KeyringRegistry};
pub use service::{KeyringService, KeyringServiceBuilder, LockState};
pub use session::{SessionKey, SessionManager, SessionStatus};
pub use types::{Account, KeyringType, Signature, TransactionRequest, TypedDataRequest};
