//! Session manager: the single command execution boundary.
//!
//! Owns one [`Session`] per registered host and the cancellation registry.
//! Different hosts run fully in parallel; each session serializes its own
//! commands.

use crate::cancel::{CancelReason, CancelRegistry, CancelStats, CommandHandle};
use crate::commands::RemoteCommand;
use crate::error::{CommandError, ConnectError};
use crate::host::HostConfig;
use crate::session::Session;
use crate::transport::{CommandOutput, RemoteTransport};
use dashmap::DashMap;
use futures::future::join_all;
use hacore_types::{ConnectionState, HostId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Manager-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Budget for signalling a remote process group after timeout or cancel.
    pub kill_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            kill_timeout: Duration::from_secs(5),
        }
    }
}

/// A command started with [`SessionManager::run_async`].
#[derive(Debug)]
pub struct PendingCommand {
    handle: CommandHandle,
    join: JoinHandle<Result<CommandOutput, CommandError>>,
}

impl PendingCommand {
    /// Handle for [`SessionManager::cancel`].
    pub fn handle(&self) -> &CommandHandle {
        &self.handle
    }

    /// Wait for the command to finish.
    pub async fn wait(self) -> Result<CommandOutput, CommandError> {
        let host = self.handle.host().clone();
        match self.join.await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Cancelled { host }),
        }
    }
}

/// Registry of host sessions.
pub struct SessionManager {
    transport: Arc<dyn RemoteTransport>,
    sessions: DashMap<HostId, Arc<Session>>,
    registry: Arc<CancelRegistry>,
    options: SessionOptions,
}

impl SessionManager {
    /// Create a manager over `transport`.
    pub fn new(transport: Arc<dyn RemoteTransport>, options: SessionOptions) -> Self {
        Self {
            transport,
            sessions: DashMap::new(),
            registry: Arc::new(CancelRegistry::new()),
            options,
        }
    }

    /// Register a host, replacing any previous session for the same id.
    pub fn add_host(&self, config: HostConfig) -> Arc<Session> {
        let id = config.id.clone();
        let session = Arc::new(Session::new(
            config,
            self.transport.clone(),
            self.options.kill_timeout,
        ));
        if self.sessions.insert(id.clone(), session.clone()).is_some() {
            debug!(host = %id, "replaced host session");
        } else {
            info!(host = %id, "registered host");
        }
        session
    }

    /// Forget a host and close its session.
    pub async fn remove_host(&self, id: &HostId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.disconnect().await;
                info!(host = %id, "removed host");
                true
            }
            None => false,
        }
    }

    /// Session for a host.
    pub fn session(&self, id: &HostId) -> Result<Arc<Session>, ConnectError> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ConnectError::UnknownHost(id.clone()))
    }

    /// Registered hosts, sorted.
    pub fn hosts(&self) -> Vec<HostId> {
        let mut ids: Vec<HostId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Connection state of a host.
    pub fn state(&self, id: &HostId) -> Option<ConnectionState> {
        self.sessions.get(id).map(|s| s.state())
    }

    /// Connect one host.
    pub async fn connect(&self, id: &HostId) -> Result<Arc<Session>, ConnectError> {
        let session = self.session(id)?;
        session.connect().await?;
        Ok(session)
    }

    /// Connect every registered host concurrently.
    pub async fn connect_all(&self) -> Vec<(HostId, Result<(), ConnectError>)> {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut results = join_all(sessions.into_iter().map(|session| async move {
            let id = session.id().clone();
            (id, session.connect().await)
        }))
        .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Run a command and wait for it.
    pub async fn run(
        &self,
        id: &HostId,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.run_registered(id, command, timeout, None).await
    }

    /// Run a command that is also cancelled when `parent` is.
    pub async fn run_with_token(
        &self,
        id: &HostId,
        command: &RemoteCommand,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.run_registered(id, command, timeout, Some(parent)).await
    }

    async fn run_registered(
        &self,
        id: &HostId,
        command: &RemoteCommand,
        timeout: Duration,
        parent: Option<&CancellationToken>,
    ) -> Result<CommandOutput, CommandError> {
        let session = self.session(id)?;
        let (handle, token) = match parent {
            Some(parent) => self.registry.register_child(id, parent),
            None => self.registry.register(id),
        };
        let result = session.run(command, timeout, &token).await;
        self.registry.complete(&handle);
        result
    }

    /// Start a command in the background and return its handle.
    pub fn run_async(
        &self,
        id: &HostId,
        command: RemoteCommand,
        timeout: Duration,
    ) -> Result<PendingCommand, CommandError> {
        let session = self.session(id)?;
        let (handle, token) = self.registry.register(id);
        let registry = self.registry.clone();
        let task_handle = handle.clone();
        let join = tokio::spawn(async move {
            let result = session.run(&command, timeout, &token).await;
            registry.complete(&task_handle);
            result
        });
        Ok(PendingCommand { handle, join })
    }

    /// Cancel a running command. Returns false if it already finished.
    pub fn cancel(&self, handle: &CommandHandle) -> bool {
        self.cancel_with(handle, CancelReason::UserRequested)
    }

    /// Cancel with an explicit reason.
    pub fn cancel_with(&self, handle: &CommandHandle, reason: CancelReason) -> bool {
        let cancelled = self.registry.cancel(handle, reason);
        if cancelled {
            info!(host = %handle.host(), id = handle.id(), %reason, "command cancelled");
        }
        cancelled
    }

    /// Cancellation statistics.
    pub fn cancel_stats(&self) -> CancelStats {
        self.registry.stats()
    }

    /// Close every session.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        join_all(sessions.iter().map(|s| s.disconnect())).await;
    }
}
