//! Session manager: one live session per `(address, brand)`, one driver task per session

use super::{
    ClientMeta, ConnectDescriptor, PeerEvent, PeerOutcome, RemoteCall, RemoteRequest,
    SessionKey, SessionStatus, SessionTransport, StatusLatch, TransportSession,
};
use crate::config::KeyringConfig;
use crate::event::KeyringEvent;
use crate::types::{normalize_address, Signature};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Relay endpoint
    pub bridge_url: String,
    /// Metadata shown to peers
    pub client_meta: ClientMeta,
    /// Absolute lifetime of a session
    pub max_duration: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self::from(&KeyringConfig::default())
    }
}

impl From<&KeyringConfig> for SessionManagerConfig {
    fn from(config: &KeyringConfig) -> Self {
        Self {
            bridge_url: config.session_bridge_url.clone(),
            client_meta: ClientMeta::default(),
            max_duration: config.session_max_duration(),
        }
    }
}

/// Session manager statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Sessions ever opened
    pub total_created: u64,
    /// Sessions currently tracked
    pub active: usize,
    /// Requests answered with a signature
    pub total_submitted: u64,
    /// Connections or requests declined by the peer
    pub total_rejected: u64,
    /// Sessions ended by failure or disconnect
    pub total_failed: u64,
    /// Sessions ended by reaching their lifetime
    pub total_expired: u64,
}

/// Snapshot of one session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub key: SessionKey,
    pub status: SessionStatus,
    /// Operations started (0 while connecting)
    pub operation: u64,
    pub created_at: DateTime<Utc>,
    /// Whether a request is awaiting the peer
    pub busy: bool,
    /// Chain negotiated with the peer
    pub chain_id: Option<u64>,
}

struct PendingOperation {
    call_id: u64,
    operation: u64,
    reply: oneshot::Sender<Result<Signature>>,
}

struct SessionState {
    latch: StatusLatch,
    alive: bool,
    on_connect: Option<oneshot::Sender<Result<()>>>,
    pending: Option<PendingOperation>,
    chain_id: Option<u64>,
}

struct RemoteSession {
    id: String,
    key: SessionKey,
    created_at: DateTime<Utc>,
    expires_at: Instant,
    state: Mutex<SessionState>,
    closed: Notify,
    torn_down: AtomicBool,
}

impl RemoteSession {
    fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        SessionInfo {
            session_id: self.id.clone(),
            key: self.key.clone(),
            status: state.latch.status(),
            operation: state.latch.operation(),
            created_at: self.created_at,
            busy: state.pending.is_some(),
            chain_id: state.chain_id,
        }
    }

    /// Connected and usable for requests
    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.alive && state.latch.status() != SessionStatus::Pending
    }
}

/// Why a session ends
enum Ending {
    /// Peer or relay dropped the session
    Disconnected(String),
    /// Lifetime reached
    Expired,
    /// Closed locally
    Closed(String),
    /// Terminal state already recorded by the event handler
    Settled,
}

impl Ending {
    fn error(&self, key: &SessionKey) -> Error {
        match self {
            Ending::Disconnected(reason) => Error::Transport(format!("{}: {}", key, reason)),
            Ending::Expired => Error::SessionExpired(format!("{} reached its lifetime", key)),
            Ending::Closed(reason) => Error::SessionExpired(format!("{}: {}", key, reason)),
            Ending::Settled => Error::Transport(format!("{} ended", key)),
        }
    }
}

struct Shared {
    transport: Arc<dyn SessionTransport>,
    config: SessionManagerConfig,
    sessions: DashMap<SessionKey, Arc<RemoteSession>>,
    connect_locks: DashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>,
    stats: RwLock<SessionStats>,
    events: broadcast::Sender<KeyringEvent>,
    next_call_id: AtomicU64,
}

impl Shared {
    fn publish(&self, session: &RemoteSession, status: SessionStatus) {
        debug!(session = %session.key, %status, "Session status changed");
        // No subscribers is fine
        let _ = self.events.send(KeyringEvent::SessionStatusChanged {
            address: session.key.address.clone(),
            brand: session.key.brand.clone(),
            session_id: session.id.clone(),
            status,
        });
    }

    fn record(&self, status: SessionStatus) {
        let mut stats = self.stats.write();
        match status {
            SessionStatus::Submitted => stats.total_submitted += 1,
            SessionStatus::Rejected => stats.total_rejected += 1,
            SessionStatus::Failed => stats.total_failed += 1,
            _ => {}
        }
    }

    /// Apply a status change under the session lock, publishing it if it took effect
    fn apply(
        &self,
        session: &RemoteSession,
        state: &mut SessionState,
        operation: u64,
        next: SessionStatus,
    ) -> bool {
        let transition = state.latch.transition(operation, next);
        if transition.is_applied() {
            self.record(next);
            self.publish(session, next);
            true
        } else {
            debug!(session = %session.key, ?transition, %next, "Status update suppressed");
            false
        }
    }

    /// Process one peer event; returns how the session ends, if it does
    fn handle_event(&self, session: &RemoteSession, event: PeerEvent) -> Option<Ending> {
        let mut state = session.state.lock();

        match event {
            PeerEvent::Approved { accounts, chain_id } => {
                let authorized = accounts
                    .iter()
                    .any(|a| normalize_address(a).ok().as_deref() == Some(session.key.address.as_str()));

                if !authorized {
                    warn!(session = %session.key, "Peer approved without the requested account");
                    self.apply(session, &mut state, 0, SessionStatus::Failed);
                    if let Some(tx) = state.on_connect.take() {
                        let _ = tx.send(Err(Error::RemoteUnauthorized(format!(
                            "peer did not grant {}",
                            session.key.address
                        ))));
                    }
                    return Some(Ending::Settled);
                }

                if self.apply(session, &mut state, 0, SessionStatus::Connected) {
                    state.chain_id = chain_id.or(state.chain_id);
                    info!(session = %session.key, session_id = %session.id, "Remote session connected");
                    if let Some(tx) = state.on_connect.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                None
            }

            PeerEvent::ConnectRejected { reason } => {
                if self.apply(session, &mut state, 0, SessionStatus::Rejected) {
                    if let Some(tx) = state.on_connect.take() {
                        let _ = tx.send(Err(Error::RemoteRejected(reason)));
                    }
                    Some(Ending::Settled)
                } else {
                    Some(Ending::Disconnected(reason))
                }
            }

            PeerEvent::Response { id, outcome } => {
                let matches = state.pending.as_ref().map(|p| p.call_id) == Some(id);
                if !matches {
                    debug!(session = %session.key, id, "Dropping response for a settled request");
                    return None;
                }
                let pending = state.pending.take()?;

                let (status, result) = match outcome {
                    PeerOutcome::Signature(hex) => match Signature::from_hex(&hex) {
                        Ok(sig) => (SessionStatus::Submitted, Ok(sig)),
                        Err(e) => (SessionStatus::Failed, Err(e)),
                    },
                    PeerOutcome::Rejected(reason) => {
                        (SessionStatus::Rejected, Err(Error::RemoteRejected(reason)))
                    }
                    PeerOutcome::Error(message) => (SessionStatus::Failed, Err(Error::Transport(message))),
                };

                self.apply(session, &mut state, pending.operation, status);
                let _ = pending.reply.send(result);

                (status == SessionStatus::Failed).then_some(Ending::Settled)
            }

            PeerEvent::Disconnected { reason } => Some(Ending::Disconnected(reason)),
        }
    }

    /// Mark the session dead and fail whatever is waiting on it
    fn settle(&self, session: &RemoteSession, ending: &Ending) {
        let mut state = session.state.lock();
        state.alive = false;

        let operation = state.latch.operation();
        if self.apply(session, &mut state, operation, SessionStatus::Failed)
            && matches!(ending, Ending::Expired)
        {
            self.stats.write().total_expired += 1;
        }
        if let Some(pending) = state.pending.take() {
            let _ = pending.reply.send(Err(ending.error(&session.key)));
        }
        if let Some(tx) = state.on_connect.take() {
            let _ = tx.send(Err(ending.error(&session.key)));
        }
    }

    /// Forget the connect lock of `key` once no session or connect uses it
    fn prune_connect_lock(&self, key: &SessionKey) {
        if self.sessions.contains_key(key) {
            return;
        }
        self.connect_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Settle, forget and release the session on the relay (close, then kill)
    async fn teardown(&self, session: &Arc<RemoteSession>, ending: Ending) {
        self.settle(session, &ending);
        self.sessions
            .remove_if(&session.key, |_, current| Arc::ptr_eq(current, session));
        self.prune_connect_lock(&session.key);
        session.closed.notify_one();

        if session.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.transport.close(&session.id).await {
            warn!(session_id = %session.id, error = %e, "Failed to close remote session");
        }
        // Best effort
        if let Err(e) = self.transport.kill_session(&session.id).await {
            debug!(session_id = %session.id, error = %e, "Failed to kill remote session");
        }
        info!(session = %session.key, session_id = %session.id, "Remote session torn down");
    }
}

/// Driver task: feeds peer events into the session until it ends
async fn drive(
    shared: Arc<Shared>,
    session: Arc<RemoteSession>,
    mut events: tokio::sync::mpsc::Receiver<PeerEvent>,
) {
    let expiry = tokio::time::sleep_until(session.expires_at);
    tokio::pin!(expiry);

    let ending = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(ending) = shared.handle_event(&session, event) {
                        break ending;
                    }
                }
                None => break Ending::Disconnected("transport closed the session".into()),
            },
            _ = &mut expiry => break Ending::Expired,
            _ = session.closed.notified() => break Ending::Closed("closed".into()),
        }
    };

    shared.teardown(&session, ending).await;
}

/// Manages remote sessions for every `(address, brand)` pair
///
/// Each pair has at most one live session. Connecting a pair first tears
/// down its previous session. A session serves one request at a time;
/// a second request while one is in flight fails with
/// [`Error::SessionBusy`].
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create a manager publishing on its own event channel
    pub fn new(transport: Arc<dyn SessionTransport>, config: SessionManagerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self::with_events(transport, config, events)
    }

    /// Create a manager publishing status changes on `events`
    pub fn with_events(
        transport: Arc<dyn SessionTransport>,
        config: SessionManagerConfig,
        events: broadcast::Sender<KeyringEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                sessions: DashMap::new(),
                connect_locks: DashMap::new(),
                stats: RwLock::new(SessionStats::default()),
                events,
                next_call_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to status change events
    pub fn subscribe(&self) -> broadcast::Receiver<KeyringEvent> {
        self.shared.events.subscribe()
    }

    /// Connect `key`, reusing a live session
    pub async fn connect(&self, key: &SessionKey, chain_id: Option<u64>) -> Result<SessionInfo> {
        Ok(self.ensure_connected(key, chain_id).await?.info())
    }

    /// Forward `request` to the peer of `key` and wait for its answer
    #[instrument(skip(self, request), fields(session = %key, method = request.method()))]
    pub async fn sign(
        &self,
        key: &SessionKey,
        chain_id: Option<u64>,
        request: RemoteRequest,
    ) -> Result<Signature> {
        let session = self.ensure_connected(key, chain_id).await?;
        let call_id = self.shared.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();

        let operation = {
            let mut state = session.state.lock();
            if !state.alive {
                return Err(Error::SessionExpired(format!("{} is closed", key)));
            }
            if state.pending.is_some() {
                return Err(Error::SessionBusy(format!("{} has a request in flight", key)));
            }
            let operation = state.latch.begin().ok_or_else(|| {
                Error::SessionBusy(format!("{} is {}", key, state.latch.status()))
            })?;
            state.pending = Some(PendingOperation {
                call_id,
                operation,
                reply,
            });
            self.shared.publish(&session, SessionStatus::Waiting);
            operation
        };
        debug!(call_id, operation, "Request sent to peer");

        let call = RemoteCall {
            id: call_id,
            request,
        };
        if let Err(e) = self.shared.transport.send(&session.id, call).await {
            {
                let mut state = session.state.lock();
                state.pending = None;
                self.shared.apply(&session, &mut state, operation, SessionStatus::Failed);
            }
            self.shared
                .teardown(&session, Ending::Disconnected(e.to_string()))
                .await;
            return Err(e);
        }

        match tokio::time::timeout_at(session.expires_at, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::SessionExpired(format!("{} closed", key))),
            Err(_) => Err(Error::SessionExpired(format!("{} reached its lifetime", key))),
        }
    }

    /// Close the session of `key`, if any
    pub async fn disconnect(&self, key: &SessionKey) -> bool {
        let existing = self.shared.sessions.get(key).map(|e| e.value().clone());
        match existing {
            Some(session) => {
                self.shared
                    .teardown(&session, Ending::Closed("disconnected".into()))
                    .await;
                true
            }
            None => false,
        }
    }

    /// Close every session whose address is `address`
    pub async fn disconnect_address(&self, address: &str) -> usize {
        let keys: Vec<SessionKey> = self
            .shared
            .sessions
            .iter()
            .filter(|e| e.key().address == address)
            .map(|e| e.key().clone())
            .collect();
        let mut closed = 0;
        for key in keys {
            if self.disconnect(&key).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close every session
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<RemoteSession>> =
            self.shared.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            self.shared
                .teardown(&session, Ending::Closed("keyring locked".into()))
                .await;
        }
    }

    /// Tear down sessions that are dead or past their lifetime
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<Arc<RemoteSession>> = self
            .shared
            .sessions
            .iter()
            .filter(|e| !e.value().state.lock().alive || e.value().expires_at <= now)
            .map(|e| e.value().clone())
            .collect();

        for session in &stale {
            let ending = if session.expires_at <= now {
                Ending::Expired
            } else {
                Ending::Settled
            };
            self.shared.teardown(session, ending).await;
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Cleaned up remote sessions");
        }
        stale.len()
    }

    /// Status of the session of `key`
    pub fn status(&self, key: &SessionKey) -> Option<SessionStatus> {
        self.session(key).map(|info| info.status)
    }

    /// Snapshot of the session of `key`
    pub fn session(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.shared.sessions.get(key).map(|e| e.value().info())
    }

    /// Snapshots of every tracked session
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.sessions.iter().map(|e| e.value().info()).collect()
    }

    /// Manager statistics
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.shared.stats.read().clone();
        stats.active = self.shared.sessions.len();
        stats
    }

    fn connect_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.shared
            .connect_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn ensure_connected(
        &self,
        key: &SessionKey,
        chain_id: Option<u64>,
    ) -> Result<Arc<RemoteSession>> {
        let lock = self.connect_lock(key);
        let result = {
            let _guard = lock.lock().await;
            let existing = self.shared.sessions.get(key).map(|e| e.value().clone());
            match existing {
                Some(session) if session.is_ready() => Ok(session),
                _ => self.open(key, chain_id).await,
            }
        };
        drop(lock);

        if result.is_err() {
            self.shared.prune_connect_lock(key);
        }
        result
    }

    async fn open(&self, key: &SessionKey, chain_id: Option<u64>) -> Result<Arc<RemoteSession>> {
        let previous = self.shared.sessions.get(key).map(|e| e.value().clone());
        if let Some(previous) = previous {
            self.shared
                .teardown(&previous, Ending::Closed("replaced by a new connection".into()))
                .await;
        }

        let descriptor = ConnectDescriptor {
            bridge_url: self.shared.config.bridge_url.clone(),
            client_meta: self.shared.config.client_meta.clone(),
            max_duration: self.shared.config.max_duration,
            chain_id,
        };
        let TransportSession { session_id, events } =
            self.shared.transport.connect(&descriptor, key).await?;

        let (on_connect, connected) = oneshot::channel();
        let session = Arc::new(RemoteSession {
            id: session_id,
            key: key.clone(),
            created_at: Utc::now(),
            expires_at: Instant::now() + descriptor.max_duration,
            state: Mutex::new(SessionState {
                latch: StatusLatch::new(),
                alive: true,
                on_connect: Some(on_connect),
                pending: None,
                chain_id,
            }),
            closed: Notify::new(),
            torn_down: AtomicBool::new(false),
        });

        self.shared.sessions.insert(key.clone(), session.clone());
        self.shared.stats.write().total_created += 1;
        self.shared.publish(&session, SessionStatus::Pending);
        info!(session = %key, session_id = %session.id, "Remote session requested");

        tokio::spawn(drive(self.shared.clone(), session.clone(), events));

        match tokio::time::timeout_at(session.expires_at, connected).await {
            Ok(Ok(Ok(()))) => Ok(session),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::Transport(format!("{} ended before approval", key))),
            Err(_) => Err(Error::SessionExpired(format!("{} was never approved", key))),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.shared.sessions.len())
            .finish()
    }
}
