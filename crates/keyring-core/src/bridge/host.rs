//! Bridge host: the isolated context that owns device drivers

use super::{BridgeRequest, BridgeResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reserved action releasing the currently open transport
pub const ACTION_CLOSE_TRANSPORT: &str = "closeTransport";

/// A device family driver living inside the host
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Bridge target served by this driver
    fn target(&self) -> &str;

    /// Acquire the transport (USB, HID, ...)
    async fn open(&self) -> Result<()>;

    /// Release the transport
    async fn close(&self);

    /// Execute one device method
    async fn invoke(&self, action: &str, params: &[Value]) -> Result<Map<String, Value>>;
}

/// Dispatches envelopes to drivers, with at most one open connection
pub struct BridgeHost {
    drivers: HashMap<String, Arc<dyn DeviceDriver>>,
    open: Option<String>,
    connect_timeout: Duration,
}

impl BridgeHost {
    /// Host with the given transport acquisition timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            drivers: HashMap::new(),
            open: None,
            connect_timeout,
        }
    }

    /// Register a driver under its target name
    pub fn register(mut self, driver: Arc<dyn DeviceDriver>) -> Self {
        self.drivers.insert(driver.target().to_string(), driver);
        self
    }

    /// Target whose transport is currently open
    pub fn open_target(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Handle one request envelope
    pub async fn handle(&mut self, request: BridgeRequest) -> BridgeResponse {
        debug!(target_device = %request.target, action = %request.action, "Bridge request");
        let result = self.dispatch(request).await;
        if let Err(e) = &result {
            warn!(error = %e, "Bridge request failed");
        }
        result.into()
    }

    async fn dispatch(&mut self, request: BridgeRequest) -> Result<Map<String, Value>> {
        if request.action == ACTION_CLOSE_TRANSPORT {
            self.release().await;
            return Ok(Map::new());
        }

        let driver = self.drivers.get(&request.target).cloned().ok_or_else(|| {
            Error::TransportUnavailable(format!("no driver for target `{}`", request.target))
        })?;

        self.acquire(&request.target, driver.as_ref()).await?;
        driver.invoke(&request.action, &request.params).await
    }

    async fn acquire(&mut self, target: &str, driver: &dyn DeviceDriver) -> Result<()> {
        if self.open.as_deref() == Some(target) {
            return Ok(());
        }

        // One connection at a time
        self.release().await;

        tokio::time::timeout(self.connect_timeout, driver.open())
            .await
            .map_err(|_| Error::ProtocolTimeout(format!("{} transport", target)))??;

        info!(target_device = %target, "Device transport opened");
        self.open = Some(target.to_string());
        Ok(())
    }

    /// Close the open transport, if any
    pub async fn release(&mut self) {
        if let Some(previous) = self.open.take() {
            if let Some(driver) = self.drivers.get(&previous) {
                driver.close().await;
                info!(target_device = %previous, "Device transport closed");
            }
        }
    }
}
