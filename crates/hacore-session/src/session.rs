//! One logical remote shell per host.
//!
//! Commands on the same session are serialized; the timeout covers queueing
//! and execution. Each command runs in its own remote process group whose id
//! is written to a per-run pid file, so a timeout or cancellation can signal
//! the whole group over the transport without waiting for the queue.

use crate::commands::{shell_quote, RemoteCommand};
use crate::error::{CommandError, ConnectError};
use crate::host::{AuthMethod, HostConfig};
use crate::transport::{CommandOutput, ExecRequest, RemoteTransport, TransportError};
use chrono::{DateTime, Utc};
use hacore_types::{ConnectionState, HostId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Directory for per-run pid files on the remote host.
pub const REMOTE_PID_DIR: &str = "/tmp";

enum Interrupted {
    Timeout,
    Cancelled,
}

enum ExecFailure {
    Transport(TransportError),
    Interrupted(Interrupted),
}

/// A persistent session to one host.
pub struct Session {
    host: HostConfig,
    transport: Arc<dyn RemoteTransport>,
    state: Mutex<ConnectionState>,
    auth: Mutex<Option<AuthMethod>>,
    last_snapshot: Mutex<Option<DateTime<Utc>>>,
    shell: tokio::sync::Mutex<()>,
    kill_timeout: Duration,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(host: HostConfig, transport: Arc<dyn RemoteTransport>, kill_timeout: Duration) -> Self {
        Self {
            host,
            transport,
            state: Mutex::new(ConnectionState::Disconnected),
            auth: Mutex::new(None),
            last_snapshot: Mutex::new(None),
            shell: tokio::sync::Mutex::new(()),
            kill_timeout,
        }
    }

    /// Host id.
    pub fn id(&self) -> &HostId {
        &self.host.id
    }

    /// Host configuration.
    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(host = %self.host.id, from = %*current, to = %state, "session state change");
            *current = state;
        }
    }

    /// Time of the last status snapshot taken through this session.
    pub fn last_snapshot(&self) -> Option<DateTime<Utc>> {
        *self.last_snapshot.lock()
    }

    /// Record a status snapshot time.
    pub fn mark_snapshot(&self, at: DateTime<Utc>) {
        *self.last_snapshot.lock() = Some(at);
    }

    /// Run the authentication ladder. A method that worked before is tried
    /// first. Rejected credentials advance the ladder; network failures and
    /// timeouts stop it.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut ladder = self.host.credentials.ladder();
        if let Some(previous) = self.auth.lock().clone() {
            ladder.retain(|m| m != &previous);
            ladder.insert(0, previous);
        }
        if ladder.is_empty() {
            self.set_state(ConnectionState::AuthFailed);
            return Err(ConnectError::NoCredentials {
                host: self.host.id.clone(),
            });
        }

        self.set_state(ConnectionState::Connecting);
        let timeout = self.host.connect_timeout;
        let mut last_rejection = String::from("no method accepted");

        for method in ladder {
            debug!(host = %self.host.id, method = ?method.kind(), "trying authentication");
            match tokio::time::timeout(timeout, self.transport.open(&self.host, &method)).await {
                Ok(Ok(())) => {
                    info!(host = %self.host.id, method = ?method.kind(), "session established");
                    *self.auth.lock() = Some(method);
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Ok(Err(TransportError::AuthRejected(detail))) => {
                    debug!(host = %self.host.id, method = ?method.kind(), %detail, "authentication rejected");
                    last_rejection = detail;
                }
                Ok(Err(TransportError::Network(detail))) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(ConnectError::NetworkError {
                        host: self.host.id.clone(),
                        detail,
                    });
                }
                Ok(Err(TransportError::Spawn(detail))) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(ConnectError::Spawn {
                        host: self.host.id.clone(),
                        detail,
                    });
                }
                Err(_) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(ConnectError::Timeout {
                        host: self.host.id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }

        warn!(host = %self.host.id, "all authentication methods rejected");
        *self.auth.lock() = None;
        self.set_state(ConnectionState::AuthFailed);
        Err(ConnectError::AuthFailed {
            host: self.host.id.clone(),
            detail: last_rejection,
        })
    }

    /// Close the session.
    pub async fn disconnect(&self) {
        let _shell = self.shell.lock().await;
        self.transport.close(&self.host).await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Run a command, bounded by `timeout` and `cancel`.
    ///
    /// A disconnected session connects first. A network failure during the
    /// command triggers one reconnect; the command itself is re-run only if
    /// it is read-only. Non-zero exit codes are returned as output.
    pub async fn run(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let timeout_ms = timeout.as_millis() as u64;

        let _shell = tokio::select! {
            guard = self.shell.lock() => guard,
            _ = sleep_until(deadline) => {
                return Err(CommandError::Timeout { host: self.host.id.clone(), timeout_ms });
            }
            _ = cancel.cancelled() => {
                return Err(CommandError::Cancelled { host: self.host.id.clone() });
            }
        };

        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::AuthFailed => {
                return Err(CommandError::NotConnected {
                    host: self.host.id.clone(),
                })
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.connect_bounded(deadline, timeout_ms, cancel).await?;
            }
        }

        debug!(host = %self.host.id, command = %command.name, "running");
        let first = self.exec_bounded(command, deadline, cancel).await;
        let result = match first {
            Err(ExecFailure::Transport(TransportError::Network(detail))) => {
                warn!(host = %self.host.id, %detail, "network failure, reconnecting once");
                self.set_state(ConnectionState::Disconnected);
                self.connect_bounded(deadline, timeout_ms, cancel).await?;
                if !command.read_only {
                    return Err(CommandError::NetworkError {
                        host: self.host.id.clone(),
                        detail,
                    });
                }
                self.exec_bounded(command, deadline, cancel).await
            }
            other => other,
        };

        match result {
            Ok(mut output) => {
                output.duration_ms = started.elapsed().as_millis() as u64;
                debug!(host = %self.host.id, command = %command.name, exit_code = output.exit_code, "finished");
                Ok(output)
            }
            Err(ExecFailure::Interrupted(Interrupted::Timeout)) => Err(CommandError::Timeout {
                host: self.host.id.clone(),
                timeout_ms,
            }),
            Err(ExecFailure::Interrupted(Interrupted::Cancelled)) => Err(CommandError::Cancelled {
                host: self.host.id.clone(),
            }),
            Err(ExecFailure::Transport(TransportError::Network(detail))) => {
                self.set_state(ConnectionState::Disconnected);
                Err(CommandError::NetworkError {
                    host: self.host.id.clone(),
                    detail,
                })
            }
            Err(ExecFailure::Transport(TransportError::AuthRejected(detail))) => {
                self.set_state(ConnectionState::AuthFailed);
                Err(ConnectError::AuthFailed {
                    host: self.host.id.clone(),
                    detail,
                }
                .into())
            }
            Err(ExecFailure::Transport(TransportError::Spawn(detail))) => Err(CommandError::Spawn {
                host: self.host.id.clone(),
                detail,
            }),
        }
    }

    async fn connect_bounded(
        &self,
        deadline: Instant,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        tokio::select! {
            res = self.connect() => res.map_err(CommandError::from),
            _ = sleep_until(deadline) => {
                self.set_state(ConnectionState::Disconnected);
                Err(CommandError::Timeout { host: self.host.id.clone(), timeout_ms })
            }
            _ = cancel.cancelled() => {
                self.set_state(ConnectionState::Disconnected);
                Err(CommandError::Cancelled { host: self.host.id.clone() })
            }
        }
    }

    async fn exec_bounded(
        &self,
        command: &RemoteCommand,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecFailure> {
        let auth = self
            .auth
            .lock()
            .clone()
            .ok_or(ExecFailure::Transport(TransportError::Network(
                "no authenticated method".to_string(),
            )))?;
        let pid_file = format!("{}/hacore-{}.pid", REMOTE_PID_DIR, uuid::Uuid::new_v4().simple());
        let request = self.build_request(command, &pid_file);

        let interrupted = tokio::select! {
            res = self.transport.exec(&self.host, &auth, request) => {
                return res.map_err(ExecFailure::Transport);
            }
            _ = sleep_until(deadline) => Interrupted::Timeout,
            _ = cancel.cancelled() => Interrupted::Cancelled,
        };

        // The exec future is dropped at this point, which takes the local
        // transport process down; the remote group still needs a signal.
        self.kill_group(&auth, command.privileged, &pid_file).await;
        Err(ExecFailure::Interrupted(interrupted))
    }

    fn build_request(&self, command: &RemoteCommand, pid_file: &str) -> ExecRequest {
        let inner = format!(
            "echo $$ > \"$0\"; {}; rc=$?; rm -f \"$0\"; exit $rc",
            command.line
        );
        let grouped = format!("setsid -w sh -c {} {}", shell_quote(&inner), shell_quote(pid_file));
        if command.privileged {
            let (script, stdin) = self.host.escalation.wrap(&grouped);
            ExecRequest { script, stdin }
        } else {
            ExecRequest::new(grouped)
        }
    }

    async fn kill_group(&self, auth: &AuthMethod, privileged: bool, pid_file: &str) {
        let kill = format!(
            "sh -c {} {}",
            shell_quote("kill -TERM -- -\"$(cat \"$0\")\" 2>/dev/null; rm -f \"$0\""),
            shell_quote(pid_file)
        );
        let request = if privileged {
            let (script, stdin) = self.host.escalation.wrap(&kill);
            ExecRequest { script, stdin }
        } else {
            ExecRequest::new(kill)
        };
        match tokio::time::timeout(self.kill_timeout, self.transport.exec(&self.host, auth, request)).await {
            Ok(Ok(_)) => debug!(host = %self.host.id, %pid_file, "remote process group signalled"),
            Ok(Err(e)) => warn!(host = %self.host.id, %pid_file, error = %e, "failed to signal remote process group"),
            Err(_) => warn!(host = %self.host.id, %pid_file, "timed out signalling remote process group"),
        }
    }
}
