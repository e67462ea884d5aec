//! Cancellation handles for in-flight remote commands.
//!
//! Every `run` registers here and receives a [`CommandHandle`]. Cancelling a
//! handle fires the command's token; the session then signals the remote
//! process group, so cancellation never just abandons the local wait.

use hacore_types::HostId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Why a command was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// Explicit operator cancellation.
    #[default]
    UserRequested,
    /// The enclosing poll was cancelled.
    PollCancelled,
    /// The engine is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserRequested => write!(f, "UserRequested"),
            CancelReason::PollCancelled => write!(f, "PollCancelled"),
            CancelReason::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Identifies one registered remote command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandHandle {
    id: u64,
    host: HostId,
}

impl CommandHandle {
    /// Registry-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Host the command runs on.
    pub fn host(&self) -> &HostId {
        &self.host
    }
}

/// Statistics about cancellation operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelStats {
    /// Total commands registered.
    pub total_registered: u64,
    /// Total commands cancelled.
    pub total_cancelled: u64,
    /// Total commands completed and deregistered.
    pub total_completed: u64,
    /// Currently registered.
    pub active_count: usize,
}

struct Entry {
    token: CancellationToken,
    reason: Option<CancelReason>,
}

/// Tracks the tokens of all in-flight commands.
#[derive(Default)]
pub struct CancelRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
    total_registered: AtomicU64,
    total_cancelled: AtomicU64,
    total_completed: AtomicU64,
}

impl CancelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command with an independent token.
    pub fn register(&self, host: &HostId) -> (CommandHandle, CancellationToken) {
        self.register_with(host, CancellationToken::new())
    }

    /// Register a command whose token is a child of `parent`, so cancelling
    /// the parent (e.g. a whole poll) cancels the command too.
    pub fn register_child(
        &self,
        host: &HostId,
        parent: &CancellationToken,
    ) -> (CommandHandle, CancellationToken) {
        self.register_with(host, parent.child_token())
    }

    fn register_with(
        &self,
        host: &HostId,
        token: CancellationToken,
    ) -> (CommandHandle, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().insert(
            id,
            Entry {
                token: token.clone(),
                reason: None,
            },
        );
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        (
            CommandHandle {
                id,
                host: host.clone(),
            },
            token,
        )
    }

    /// Cancel a command. Returns false if it already finished.
    pub fn cancel(&self, handle: &CommandHandle, reason: CancelReason) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&handle.id) {
            Some(entry) => {
                if entry.reason.is_none() {
                    entry.reason = Some(reason);
                    self.total_cancelled.fetch_add(1, Ordering::Relaxed);
                }
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Reason recorded for a cancelled, still-registered command.
    pub fn reason(&self, handle: &CommandHandle) -> Option<CancelReason> {
        self.entries.lock().get(&handle.id).and_then(|e| e.reason)
    }

    /// Deregister a finished command.
    pub fn complete(&self, handle: &CommandHandle) {
        if self.entries.lock().remove(&handle.id).is_some() {
            self.total_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> CancelStats {
        CancelStats {
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_cancelled: self.total_cancelled.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            active_count: self.entries.lock().len(),
        }
    }
}
