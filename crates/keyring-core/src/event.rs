//! Notifications published by the keyring service

use crate::session::SessionStatus;
use serde::{Deserialize, Serialize};

/// Event broadcast to subscribers of [`KeyringService::subscribe`](crate::KeyringService::subscribe)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum KeyringEvent {
    /// Vault decrypted, keyrings live
    Unlocked,
    /// Secrets dropped from memory
    Locked,
    /// The flattened account list changed
    AccountsChanged { accounts: Vec<String> },
    /// A remote session moved to a new status
    SessionStatusChanged {
        address: String,
        brand: String,
        session_id: String,
        status: SessionStatus,
    },
}
