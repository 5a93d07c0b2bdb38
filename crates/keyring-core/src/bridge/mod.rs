//! Hardware bridge
//!
//! Device SDKs run in an isolated host context. The keyring talks to it only
//! through serializable envelopes:
//!
//! ```text
//! request:  { "target": "ledger", "action": "signPersonalMessage", "params": [...] }
//! response: { ...result fields... }  |  { "error": { "kind": "...", "message": "..." } }
//! ```
//!
//! - [`BridgeClient`]: caller side. Queues calls per target, applies the timeout,
//!   maps faults to [`Error`] kinds.
//! - [`BridgeHost`]: host side. Owns the [`DeviceDriver`]s and keeps at most one
//!   device connection open.
//! - [`LocalBridge`]: runs a host on its own task behind a channel.
//! - [`MemoryDevice`]: software-emulated device for tests and demos.

mod client;
mod host;
mod local;
mod memory;

pub use client::{BridgeClient, PendingRequest};
pub use host::{BridgeHost, DeviceDriver, ACTION_CLOSE_TRANSPORT};
pub use local::LocalBridge;
pub use memory::MemoryDevice;

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Derive an address for `params[0]` (derivation path)
pub const ACTION_GET_ADDRESS: &str = "getAddress";
/// Sign `params[1]` (hex unsigned tx) with `params[0]`; `params[2]` is the chain id
pub const ACTION_SIGN_TRANSACTION: &str = "signTransaction";
/// Sign `params[1]` (hex message) with `params[0]`
pub const ACTION_SIGN_PERSONAL_MESSAGE: &str = "signPersonalMessage";
/// Sign `params[1]`/`params[2]` (domain/struct hashes) with `params[0]`; `params[3]` is the raw JSON
pub const ACTION_SIGN_TYPED_DATA: &str = "signTypedData";

/// Request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Device family, e.g. `ledger`
    pub target: String,
    /// Device method name
    pub action: String,
    /// Positional arguments
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Classification of a bridge failure, carried across the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transport cannot be acquired on this host
    TransportUnavailable,
    /// User declined on the device
    DeviceRejected,
    /// Device did not answer in time
    Timeout,
    /// Anything else
    Device,
}

/// Error payload of a response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFault {
    pub kind: FaultKind,
    pub message: String,
}

impl From<Error> for BridgeFault {
    fn from(err: Error) -> Self {
        let (kind, message) = match err {
            Error::TransportUnavailable(m) => (FaultKind::TransportUnavailable, m),
            Error::DeviceRejected(m) => (FaultKind::DeviceRejected, m),
            Error::ProtocolTimeout(m) => (FaultKind::Timeout, m),
            Error::Bridge(m) => (FaultKind::Device, m),
            other => (FaultKind::Device, other.to_string()),
        };
        Self { kind, message }
    }
}

impl From<BridgeFault> for Error {
    fn from(fault: BridgeFault) -> Self {
        match fault.kind {
            FaultKind::TransportUnavailable => Error::TransportUnavailable(fault.message),
            FaultKind::DeviceRejected => Error::DeviceRejected(fault.message),
            FaultKind::Timeout => Error::ProtocolTimeout(fault.message),
            FaultKind::Device => Error::Bridge(fault.message),
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    /// Failure
    Failure { error: BridgeFault },
    /// Result fields
    Success(Map<String, Value>),
}

impl BridgeResponse {
    /// Convert into the result fields or the mapped error
    pub fn into_result(self) -> Result<Map<String, Value>> {
        match self {
            BridgeResponse::Success(fields) => Ok(fields),
            BridgeResponse::Failure { error } => Err(error.into()),
        }
    }
}

impl From<Result<Map<String, Value>>> for BridgeResponse {
    fn from(result: Result<Map<String, Value>>) -> Self {
        match result {
            Ok(fields) => BridgeResponse::Success(fields),
            Err(e) => BridgeResponse::Failure { error: e.into() },
        }
    }
}

/// Carries envelopes from the caller to a bridge host
#[async_trait]
pub trait BridgeChannel: Send + Sync {
    /// Deliver one request and wait for its response
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse>;
}

/// Read a string field from a response
pub(crate) fn field_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Bridge(format!("response missing `{}`", name)))
}
