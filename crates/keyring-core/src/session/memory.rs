//! In-memory session transport with a scriptable peer wallet
//!
//! The peer holds real keys per brand, approves or rejects connections and
//! answers requests according to the configured modes. Useful for:
//! - Unit and integration testing
//! - Local development without a relay

use super::{
    ConnectDescriptor, PeerEvent, PeerOutcome, RemoteCall, SessionKey, SessionTransport,
    TransportSession,
};
use crate::keyring::simple::{parse_private_key, sign_prehash};
use crate::types::{address_from_verifying_key, normalize_address};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use k256::ecdsa::SigningKey;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const PEER_QUEUE: usize = 16;

/// How the peer answers connection requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Approve with the brand's accounts
    Approve,
    /// Decline the connection
    Reject,
    /// Never answer
    Silent,
}

/// How the peer answers signing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Sign with the matching key
    Sign,
    /// Decline
    Reject,
    /// Report a failure
    Error,
    /// Never answer
    Silent,
    /// Sign, then send a late error for the same request
    SignThenError,
}

struct PeerLink {
    brand: String,
    events: mpsc::Sender<PeerEvent>,
}

#[derive(Default)]
struct Log {
    closed: Vec<String>,
    killed: Vec<String>,
    requests: Vec<RemoteCall>,
}

struct Inner {
    wallets: RwLock<HashMap<String, Vec<SigningKey>>>,
    approval: RwLock<ApprovalMode>,
    response: RwLock<ResponseMode>,
    approved_override: RwLock<Option<Vec<String>>>,
    peers: DashMap<String, PeerLink>,
    counter: AtomicU64,
    log: Mutex<Log>,
}

/// In-memory transport for local testing
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Peer that approves and signs
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                wallets: RwLock::new(HashMap::new()),
                approval: RwLock::new(ApprovalMode::Approve),
                response: RwLock::new(ResponseMode::Sign),
                approved_override: RwLock::new(None),
                peers: DashMap::new(),
                counter: AtomicU64::new(0),
                log: Mutex::new(Log::default()),
            }),
        }
    }

    /// Give the `brand` wallet a private key, returning its address
    pub fn add_wallet(&self, brand: &str, private_key: &str) -> Result<String> {
        let key = parse_private_key(private_key)?;
        let address = address_from_verifying_key(key.verifying_key());
        self.inner
            .wallets
            .write()
            .entry(brand.to_string())
            .or_default()
            .push(key);
        Ok(address)
    }

    pub fn set_approval(&self, mode: ApprovalMode) {
        *self.inner.approval.write() = mode;
    }

    pub fn set_response(&self, mode: ResponseMode) {
        *self.inner.response.write() = mode;
    }

    /// Approve connections with these accounts instead of the wallet's own
    pub fn set_approved_accounts(&self, accounts: Option<Vec<String>>) {
        *self.inner.approved_override.write() = accounts;
    }

    /// Simulate the peer dropping a session
    pub fn disconnect(&self, session_id: &str, reason: &str) {
        self.emit(
            session_id,
            PeerEvent::Disconnected {
                reason: reason.to_string(),
            },
        );
    }

    /// Deliver an arbitrary event on a session
    pub fn emit(&self, session_id: &str, event: PeerEvent) {
        if let Some(link) = self.inner.peers.get(session_id) {
            let _ = link.events.try_send(event);
        }
    }

    /// Sessions not yet closed
    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.inner.log.lock().closed.clone()
    }

    pub fn killed_sessions(&self) -> Vec<String> {
        self.inner.log.lock().killed.clone()
    }

    /// Every request forwarded to the peer
    pub fn requests(&self) -> Vec<RemoteCall> {
        self.inner.log.lock().requests.clone()
    }

    /// Number of connections ever opened
    pub fn connect_count(&self) -> u64 {
        self.inner.counter.load(Ordering::SeqCst)
    }

    fn accounts_for(&self, brand: &str) -> Vec<String> {
        if let Some(accounts) = self.inner.approved_override.read().clone() {
            return accounts;
        }
        self.inner
            .wallets
            .read()
            .get(brand)
            .map(|keys| {
                keys.iter()
                    .map(|k| address_from_verifying_key(k.verifying_key()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn answer(&self, brand: &str, call: &RemoteCall) -> Vec<PeerOutcome> {
        let mode = *self.inner.response.read();
        match mode {
            ResponseMode::Silent => vec![],
            ResponseMode::Reject => vec![PeerOutcome::Rejected("User rejected the request".into())],
            ResponseMode::Error => vec![PeerOutcome::Error("Peer wallet failure".into())],
            ResponseMode::Sign | ResponseMode::SignThenError => {
                let signed = self.sign(brand, call);
                if mode == ResponseMode::SignThenError {
                    vec![signed, PeerOutcome::Error("late failure".into())]
                } else {
                    vec![signed]
                }
            }
        }
    }

    fn sign(&self, brand: &str, call: &RemoteCall) -> PeerOutcome {
        let wanted = match normalize_address(call.request.address()) {
            Ok(address) => address,
            Err(e) => return PeerOutcome::Error(e.to_string()),
        };
        let wallets = self.inner.wallets.read();
        let key = wallets.get(brand).and_then(|keys| {
            keys.iter()
                .find(|k| address_from_verifying_key(k.verifying_key()) == wanted)
        });
        match key {
            Some(key) => match sign_prehash(key, &call.request.signing_hash()) {
                Ok(sig) => PeerOutcome::Signature(sig.to_hex()),
                Err(e) => PeerOutcome::Error(e.to_string()),
            },
            None => PeerOutcome::Error(format!("{} not held by {}", wanted, brand)),
        }
    }
}

#[async_trait]
impl SessionTransport for MemoryTransport {
    async fn connect(
        &self,
        descriptor: &ConnectDescriptor,
        key: &SessionKey,
    ) -> Result<TransportSession> {
        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("session-{}", n);
        let (events, rx) = mpsc::channel(PEER_QUEUE);

        let greeting = match *self.inner.approval.read() {
            ApprovalMode::Approve => Some(PeerEvent::Approved {
                accounts: self.accounts_for(&key.brand),
                chain_id: descriptor.chain_id,
            }),
            ApprovalMode::Reject => Some(PeerEvent::ConnectRejected {
                reason: "User rejected the connection".into(),
            }),
            ApprovalMode::Silent => None,
        };
        if let Some(event) = greeting {
            let _ = events.try_send(event);
        }

        self.inner.peers.insert(
            session_id.clone(),
            PeerLink {
                brand: key.brand.clone(),
                events,
            },
        );

        Ok(TransportSession {
            session_id,
            events: rx,
        })
    }

    async fn send(&self, session_id: &str, call: RemoteCall) -> Result<()> {
        let (brand, events) = {
            let link = self
                .inner
                .peers
                .get(session_id)
                .ok_or_else(|| Error::Transport(format!("unknown session {}", session_id)))?;
            (link.brand.clone(), link.events.clone())
        };
        self.inner.log.lock().requests.push(call.clone());

        for outcome in self.answer(&brand, &call) {
            let _ = events.try_send(PeerEvent::Response {
                id: call.id,
                outcome,
            });
        }
        Ok(())
    }

    async fn close(&self, session_id: &str) -> Result<()> {
        self.inner.peers.remove(session_id);
        self.inner.log.lock().closed.push(session_id.to_string());
        Ok(())
    }

    async fn kill_session(&self, session_id: &str) -> Result<()> {
        self.inner.log.lock().killed.push(session_id.to_string());
        Ok(())
    }
}
