//! Vault storage backends
//!
//! The store only ever sees the encrypted vault record. Two backends:
//!
//! - **MemoryVaultStore**: in-process (tests, embedding in a host that persists elsewhere)
//! - **FileVaultStore**: a single JSON file on disk
//!
//! The interface is async so remote or platform-keychain backends can slot in.

use super::EncryptedVault;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for vault storage backends
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Load the stored vault, `None` if nothing was ever booted
    async fn load(&self) -> Result<Option<EncryptedVault>>;

    /// Overwrite the stored vault
    async fn save(&self, vault: &EncryptedVault) -> Result<()>;

    /// Remove the stored vault
    async fn clear(&self) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryVaultStore {
    vault: Arc<RwLock<Option<EncryptedVault>>>,
}

impl MemoryVaultStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with an existing vault
    pub fn with_vault(vault: EncryptedVault) -> Self {
        Self {
            vault: Arc::new(RwLock::new(Some(vault))),
        }
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn load(&self) -> Result<Option<EncryptedVault>> {
        Ok(self.vault.read().await.clone())
    }

    async fn save(&self, vault: &EncryptedVault) -> Result<()> {
        *self.vault.write().await = Some(vault.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.vault.write().await = None;
        Ok(())
    }
}

/// File system store holding the vault in one JSON file
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    path: PathBuf,
}

impl FileVaultStore {
    /// Create a store at `path`, creating parent directories as needed
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self { path })
    }

    /// Location of the vault file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl VaultStore for FileVaultStore {
    async fn load(&self) -> Result<Option<EncryptedVault>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let data = tokio::fs::read(&self.path).await?;
        let vault: EncryptedVault =
            serde_json::from_slice(&data).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Some(vault))
    }

    async fn save(&self, vault: &EncryptedVault) -> Result<()> {
        let data = serde_json::to_vec_pretty(vault)?;
        let tmp = self.temp_path();

        tokio::fs::write(&tmp, data).await?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms).await?;
        }

        // Replace in one step so a crash never leaves a half-written vault
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("failed to replace vault file: {}", e)))?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await? {
            // Overwrite with zeros before deleting
            let size = tokio::fs::metadata(&self.path).await?.len() as usize;
            tokio::fs::write(&self.path, vec![0u8; size]).await?;
            tokio::fs::remove_file(&self.path).await?;
        }

        Ok(())
    }
}
