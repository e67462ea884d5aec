//! Error types for the session subsystem.

use hacore_types::HostId;
use thiserror::Error;

/// Errors establishing a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Every configured credential was rejected.
    #[error("authentication failed for {host}: {detail}")]
    AuthFailed {
        /// Host that rejected the credentials.
        host: HostId,
        /// Last rejection message.
        detail: String,
    },

    /// The host could not be reached.
    #[error("network error reaching {host}: {detail}")]
    NetworkError {
        /// Unreachable host.
        host: HostId,
        /// Transport message.
        detail: String,
    },

    /// Connection establishment exceeded the connect timeout.
    #[error("connecting to {host} timed out after {timeout_ms}ms")]
    Timeout {
        /// Host being connected.
        host: HostId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// No usable credential is configured.
    #[error("no credentials configured for {host}")]
    NoCredentials {
        /// Host without credentials.
        host: HostId,
    },

    /// The host is not registered with the session manager.
    #[error("unknown host: {0}")]
    UnknownHost(HostId),

    /// The local transport program could not be started.
    #[error("failed to launch transport for {host}: {detail}")]
    Spawn {
        /// Host being connected.
        host: HostId,
        /// Launch failure.
        detail: String,
    },
}

impl ConnectError {
    /// Host the error belongs to.
    pub fn host(&self) -> &HostId {
        match self {
            ConnectError::AuthFailed { host, .. }
            | ConnectError::NetworkError { host, .. }
            | ConnectError::Timeout { host, .. }
            | ConnectError::NoCredentials { host }
            | ConnectError::Spawn { host, .. } => host,
            ConnectError::UnknownHost(host) => host,
        }
    }
}

/// Errors running a remote command. A non-zero exit code is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Session could not be (re)established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Transport failed while the command was in flight.
    #[error("network error running command on {host}: {detail}")]
    NetworkError {
        /// Host the command targeted.
        host: HostId,
        /// Transport message.
        detail: String,
    },

    /// The command exceeded its timeout; its remote process group was signalled.
    #[error("command on {host} timed out after {timeout_ms}ms")]
    Timeout {
        /// Host the command targeted.
        host: HostId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The command was cancelled; its remote process group was signalled.
    #[error("command on {host} cancelled")]
    Cancelled {
        /// Host the command targeted.
        host: HostId,
    },

    /// The session is in a state that cannot run commands.
    #[error("session for {host} is not connected")]
    NotConnected {
        /// Host the command targeted.
        host: HostId,
    },

    /// The local transport program could not be started.
    #[error("failed to launch command for {host}: {detail}")]
    Spawn {
        /// Host the command targeted.
        host: HostId,
        /// Launch failure.
        detail: String,
    },
}

impl CommandError {
    /// Host the error belongs to.
    pub fn host(&self) -> &HostId {
        match self {
            CommandError::Connect(e) => e.host(),
            CommandError::NetworkError { host, .. }
            | CommandError::Timeout { host, .. }
            | CommandError::Cancelled { host }
            | CommandError::NotConnected { host }
            | CommandError::Spawn { host, .. } => host,
        }
    }

    /// True for timeouts, including connect timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CommandError::Timeout { .. } | CommandError::Connect(ConnectError::Timeout { .. })
        )
    }
}

/// Errors resolving a logical command.
#[derive(Debug, Error)]
pub enum CommandTableError {
    /// No template registered under this name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A placeholder had no value.
    #[error("command {command} requires parameter {param}")]
    MissingParameter {
        /// Logical command name.
        command: String,
        /// Placeholder name.
        param: String,
    },

    /// The template itself is malformed.
    #[error("malformed template for {command}: {detail}")]
    Malformed {
        /// Logical command name.
        command: String,
        /// What is wrong.
        detail: String,
    },

    /// The table document could not be parsed.
    #[error("command table parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
