//! Remote signing sessions
//!
//! A remote session links one `(address, brand)` pair to a peer wallet over a
//! relay. The [`SessionManager`] keeps at most one live session per pair,
//! runs a driver task per session and tracks status with a per-operation
//! terminal latch:
//!
//! ```text
//! PENDING -> CONNECTED -> WAITING -> SUBMITTED | REJECTED | FAILED
//!    |                       ^            |
//!    +-> REJECTED | FAILED   +------------+  (next request on a live session)
//! ```
//!
//! The relay itself sits behind [`SessionTransport`]; [`MemoryTransport`]
//! is a scriptable peer for tests.

mod manager;
mod memory;
mod status;

pub use manager::{SessionInfo, SessionManager, SessionManagerConfig, SessionStats};
pub use memory::{ApprovalMode, MemoryTransport, ResponseMode};
pub use status::{SessionStatus, StatusLatch, Transition};

use crate::types::{TransactionRequest, TypedDataRequest};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Identity of a remote session: one per address and peer wallet brand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Normalized address
    pub address: String,
    /// Peer wallet name
    pub brand: String,
}

impl SessionKey {
    pub fn new(address: impl Into<String>, brand: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            brand: brand.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.brand)
    }
}

/// Metadata shown to the peer when connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

impl Default for ClientMeta {
    fn default() -> Self {
        Self {
            name: "keyring".into(),
            description: "Keyring custody service".into(),
            url: String::new(),
            icons: Vec::new(),
        }
    }
}

/// Everything the transport needs to open a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDescriptor {
    /// Relay endpoint
    pub bridge_url: String,
    /// Client metadata
    pub client_meta: ClientMeta,
    /// Absolute session lifetime
    #[serde(with = "duration_millis")]
    pub max_duration: Duration,
    /// Chain requested at connect time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Signing request forwarded to a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RemoteRequest {
    #[serde(rename = "eth_signTransaction")]
    SignTransaction(TransactionRequest),
    #[serde(rename = "personal_sign")]
    PersonalSign {
        address: String,
        #[serde(with = "hex::serde")]
        message: Vec<u8>,
    },
    #[serde(rename = "eth_signTypedData_v4")]
    SignTypedData {
        address: String,
        data: TypedDataRequest,
    },
}

impl RemoteRequest {
    /// Prehash the peer is expected to sign
    pub fn signing_hash(&self) -> [u8; 32] {
        match self {
            RemoteRequest::SignTransaction(tx) => tx.signing_hash(),
            RemoteRequest::PersonalSign { message, .. } => {
                crate::types::personal_message_hash(message)
            }
            RemoteRequest::SignTypedData { data, .. } => data.signing_hash(),
        }
    }

    /// Account expected to sign
    pub fn address(&self) -> &str {
        match self {
            RemoteRequest::SignTransaction(tx) => &tx.from,
            RemoteRequest::PersonalSign { address, .. } => address,
            RemoteRequest::SignTypedData { address, .. } => address,
        }
    }

    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            RemoteRequest::SignTransaction(_) => "eth_signTransaction",
            RemoteRequest::PersonalSign { .. } => "personal_sign",
            RemoteRequest::SignTypedData { .. } => "eth_signTypedData_v4",
        }
    }
}

/// Request with its correlation ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCall {
    pub id: u64,
    #[serde(flatten)]
    pub request: RemoteRequest,
}

/// Peer's answer to a [`RemoteCall`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerOutcome {
    /// `0x`-prefixed `r || s || v`
    Signature(String),
    /// User declined in the peer wallet
    Rejected(String),
    /// Peer-side failure
    Error(String),
}

/// Event delivered by the transport for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerEvent {
    /// Peer approved the connection for these accounts
    Approved {
        accounts: Vec<String>,
        chain_id: Option<u64>,
    },
    /// Peer declined the connection
    ConnectRejected { reason: String },
    /// Answer to a request
    Response { id: u64, outcome: PeerOutcome },
    /// Session closed by the peer or the relay
    Disconnected { reason: String },
}

/// A freshly opened session
pub struct TransportSession {
    /// Relay-assigned session ID
    pub session_id: String,
    /// Events for this session; the stream ends when the transport drops it
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Relay connecting the service to peer wallets
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session for `key`
    async fn connect(&self, descriptor: &ConnectDescriptor, key: &SessionKey)
        -> Result<TransportSession>;

    /// Forward a request to the peer
    async fn send(&self, session_id: &str, call: RemoteCall) -> Result<()>;

    /// Close the session gracefully
    async fn close(&self, session_id: &str) -> Result<()>;

    /// Drop every trace of the session on the relay
    async fn kill_session(&self, session_id: &str) -> Result<()>;
}
