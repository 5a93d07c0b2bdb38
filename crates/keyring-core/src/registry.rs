//! Keyring registry and account resolver
//!
//! The registry owns the live keyrings in insertion order. Resolution scans
//! in that order and returns the first keyring holding the address, so an
//! address imported twice always resolves to the earlier keyring.

use crate::keyring::{Keyring, KeyringRecord};
use crate::types::{normalize_address, Account, KeyringType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Handle to a registered keyring
#[derive(Debug, Clone)]
pub struct KeyringHandle {
    /// Registry-assigned ID, stable for the unlocked session
    pub id: Uuid,
    /// The keyring
    pub keyring: Arc<Keyring>,
}

impl KeyringHandle {
    /// Summary of the keyring
    pub fn info(&self) -> KeyringInfo {
        KeyringInfo {
            id: self.id,
            keyring_type: self.keyring.keyring_type(),
            accounts: self.keyring.adapter().accounts(),
        }
    }
}

/// Serializable summary of a keyring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringInfo {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    pub accounts: Vec<Account>,
}

/// Narrows resolution to a keyring type and/or brand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub keyring_type: Option<KeyringType>,
    pub brand: Option<String>,
}

impl AccountFilter {
    /// Match any keyring
    pub fn any() -> Self {
        Self::default()
    }

    /// Only keyrings of `keyring_type`
    pub fn of_type(keyring_type: KeyringType) -> Self {
        Self {
            keyring_type: Some(keyring_type),
            brand: None,
        }
    }

    /// Only accounts under `brand`
    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    fn admits(&self, keyring: &Keyring) -> bool {
        self.keyring_type.map_or(true, |t| keyring.keyring_type() == t)
    }
}

/// Ordered collection of live keyrings
#[derive(Debug, Default)]
pub struct KeyringRegistry {
    entries: Vec<KeyringHandle>,
}

impl KeyringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a keyring
    pub fn push(&mut self, keyring: Keyring) -> KeyringHandle {
        let handle = KeyringHandle {
            id: Uuid::new_v4(),
            keyring: Arc::new(keyring),
        };
        self.entries.push(handle.clone());
        handle
    }

    /// Keyring with `id`
    pub fn get(&self, id: &Uuid) -> Option<KeyringHandle> {
        self.entries.iter().find(|h| h.id == *id).cloned()
    }

    /// Remove the keyring with `id`
    pub fn remove(&mut self, id: &Uuid) -> Option<KeyringHandle> {
        let position = self.position(id)?;
        Some(self.entries.remove(position))
    }

    /// Position of the keyring with `id`
    pub fn position(&self, id: &Uuid) -> Option<usize> {
        self.entries.iter().position(|h| h.id == *id)
    }

    /// Put `keyring` back under `id`, replacing the current entry or
    /// reinserting it at `position`
    pub fn restore(&mut self, id: Uuid, position: usize, keyring: Keyring) -> KeyringHandle {
        let handle = KeyringHandle {
            id,
            keyring: Arc::new(keyring),
        };
        match self.position(&id) {
            Some(current) => self.entries[current] = handle.clone(),
            None => {
                let position = position.min(self.entries.len());
                self.entries.insert(position, handle.clone());
            }
        }
        handle
    }

    /// Every registered keyring, in insertion order
    pub fn handles(&self) -> &[KeyringHandle] {
        &self.entries
    }

    /// Drop every keyring, returning them for shutdown
    pub fn drain(&mut self) -> Vec<KeyringHandle> {
        std::mem::take(&mut self.entries)
    }

    /// Flattened accounts of all keyrings, in keyring order
    ///
    /// Not deduplicated: an address held by two keyrings appears twice.
    pub fn accounts(&self) -> Vec<Account> {
        self.entries
            .iter()
            .flat_map(|h| h.keyring.adapter().accounts())
            .collect()
    }

    /// First keyring holding `address` among those admitted by `filter`
    pub fn resolve(&self, address: Option<&str>, filter: &AccountFilter) -> Result<KeyringHandle> {
        let address = address.ok_or(Error::NoKeyringFound)?;
        let address = normalize_address(address).map_err(|_| Error::NoKeyringFound)?;

        self.entries
            .iter()
            .filter(|h| filter.admits(&h.keyring))
            .find(|h| {
                h.keyring
                    .adapter()
                    .has_account(&address, filter.brand.as_deref())
            })
            .cloned()
            .ok_or(Error::NoKeyringFound)
    }

    /// Vault records for every keyring
    pub fn to_records(&self) -> Result<Vec<KeyringRecord>> {
        self.entries.iter().map(|h| h.keyring.to_record()).collect()
    }
}
