//! Service configuration

use crate::vault::KdfParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default BIP-44 path prefix for Ethereum accounts
pub const DEFAULT_HD_PATH: &str = "m/44'/60'/0'/0";

/// Brand assigned to hardware accounts persisted without one
pub const DEFAULT_HARDWARE_BRAND: &str = "Ledger";

/// Configuration for the keyring service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// Argon2id parameters for new vault encryptions
    pub kdf: KdfParams,
    /// Timeout for acquiring a device transport through the bridge, in milliseconds
    pub bridge_connect_timeout_ms: u64,
    /// Timeout for a single bridge round-trip once connected, in milliseconds
    pub bridge_request_timeout_ms: u64,
    /// Absolute lifetime of a remote session, in milliseconds
    pub session_max_duration_ms: u64,
    /// Most accounts a single add or import may create
    pub max_accounts_per_call: usize,
    /// Remote-session relay endpoint
    pub session_bridge_url: String,
    /// Brand backfilled into hardware accounts missing one
    pub default_hardware_brand: String,
    /// Derivation path prefix for HD and hardware keyrings
    pub hd_path: String,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            bridge_connect_timeout_ms: 100_000,
            bridge_request_timeout_ms: 300_000,
            session_max_duration_ms: 30 * 60 * 1000,
            max_accounts_per_call: 100,
            session_bridge_url: "https://bridge.walletconnect.org".to_string(),
            default_hardware_brand: DEFAULT_HARDWARE_BRAND.to_string(),
            hd_path: DEFAULT_HD_PATH.to_string(),
            event_capacity: 64,
        }
    }
}

impl KeyringConfig {
    /// Set KDF parameters
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Set the bridge connect timeout
    pub fn with_bridge_connect_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the remote session lifetime
    pub fn with_session_max_duration(mut self, duration: Duration) -> Self {
        self.session_max_duration_ms = duration_ms(duration);
        self
    }

    /// Set the per-call account limit
    pub fn with_max_accounts_per_call(mut self, max: usize) -> Self {
        self.max_accounts_per_call = max;
        self
    }

    /// Set the remote-session relay endpoint
    pub fn with_session_bridge_url(mut self, url: impl Into<String>) -> Self {
        self.session_bridge_url = url.into();
        self
    }

    /// Set the default hardware brand
    pub fn with_default_hardware_brand(mut self, brand: impl Into<String>) -> Self {
        self.default_hardware_brand = brand.into();
        self
    }

    /// Bridge connect timeout as a [`Duration`]
    pub fn bridge_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_connect_timeout_ms)
    }

    /// Bridge request timeout as a [`Duration`]
    pub fn bridge_request_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_request_timeout_ms)
    }

    /// Session lifetime as a [`Duration`]
    pub fn session_max_duration(&self) -> Duration {
        Duration::from_millis(self.session_max_duration_ms)
    }

    /// Reject account batches that are empty or above the per-call limit
    pub fn check_account_batch(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.max_accounts_per_call {
            return Err(Error::InvalidOptions(format!(
                "account count must be between 1 and {}, got {}",
                self.max_accounts_per_call, count
            )));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
