//! Remote session status and its per-operation terminal latch

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Connection requested, waiting for the peer to approve
    Pending,
    /// Peer approved the connection
    Connected,
    /// Request sent, waiting for the peer
    Waiting,
    /// Peer answered with a signature
    Submitted,
    /// Peer declined
    Rejected,
    /// Transport failure, disconnect or expiry
    Failed,
}

impl SessionStatus {
    /// Whether the status ends the current operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Submitted | SessionStatus::Rejected | SessionStatus::Failed
        )
    }

    fn allows(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Connected)
                | (Pending, Rejected)
                | (Pending, Failed)
                | (Connected, Waiting)
                | (Connected, Failed)
                | (Waiting, Submitted)
                | (Waiting, Rejected)
                | (Waiting, Failed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Waiting => "WAITING",
            SessionStatus::Submitted => "SUBMITTED",
            SessionStatus::Rejected => "REJECTED",
            SessionStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status changed
    Applied {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// Operation already reached a terminal status
    Latched,
    /// Update belongs to an earlier operation
    Stale,
    /// Not a legal move from the current status
    Invalid,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Status holder enforcing "first terminal event wins" per operation
///
/// Operation 0 is the connect handshake. Each signing request opens the next
/// operation; once an operation is terminal, later events for it are dropped.
#[derive(Debug, Clone)]
pub struct StatusLatch {
    status: SessionStatus,
    operation: u64,
}

impl Default for StatusLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLatch {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Pending,
            operation: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Current operation number
    pub fn operation(&self) -> u64 {
        self.operation
    }

    /// Start a new signing operation, moving to `Waiting`
    ///
    /// Allowed from `Connected` or after the previous operation ended with
    /// `Submitted`/`Rejected` on a live session.
    pub fn begin(&mut self) -> Option<u64> {
        let ready = match self.status {
            SessionStatus::Connected => true,
            SessionStatus::Submitted | SessionStatus::Rejected => self.operation > 0,
            _ => false,
        };
        if !ready {
            return None;
        }
        self.operation += 1;
        self.status = SessionStatus::Waiting;
        Some(self.operation)
    }

    /// Apply `next` on behalf of `operation`
    pub fn transition(&mut self, operation: u64, next: SessionStatus) -> Transition {
        if operation != self.operation {
            return Transition::Stale;
        }
        if self.status.is_terminal() {
            return Transition::Latched;
        }
        if !self.status.allows(next) {
            return Transition::Invalid;
        }
        let from = self.status;
        self.status = next;
        Transition::Applied { from, to: next }
    }
}
