//! Transport seam between sessions and the remote shell implementation.

use crate::host::{AuthMethod, HostConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failures. Remote exit codes never map here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host rejected the credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// The host could not be reached or the link dropped.
    #[error("network failure: {0}")]
    Network(String),
    /// The local transport program could not be started.
    #[error("spawn failure: {0}")]
    Spawn(String),
}

/// A fully wrapped shell script plus optional stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Script passed to the remote login shell.
    pub script: String,
    /// Bytes written to the remote stdin before it is closed.
    pub stdin: Option<String>,
}

impl ExecRequest {
    /// Script without stdin.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            stdin: None,
        }
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// True for exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// One-line failure summary for reports.
    pub fn failure_summary(&self) -> String {
        let detail = self
            .stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .or_else(|| self.stdout.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("no output");
        format!("exit code {}: {}", self.exit_code, detail)
    }
}

/// A remote shell transport. Implementations must be cancel-safe: dropping an
/// `exec` future must not leave a local child process behind.
#[async_trait]
pub trait RemoteTransport: Send + Sync + 'static {
    /// Establish (or verify) a connection with one authentication method.
    async fn open(&self, host: &HostConfig, auth: &AuthMethod) -> Result<(), TransportError>;

    /// Run a script over the established connection.
    async fn exec(
        &self,
        host: &HostConfig,
        auth: &AuthMethod,
        request: ExecRequest,
    ) -> Result<CommandOutput, TransportError>;

    /// Tear down the connection. Best effort.
    async fn close(&self, host: &HostConfig);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary_prefers_stderr() {
        let out = CommandOutput {
            stdout: "ignored".into(),
            stderr: "\n  error: resource r0 unknown\nmore".into(),
            exit_code: 10,
            duration_ms: 3,
        };
        assert_eq!(out.failure_summary(), "exit code 10: error: resource r0 unknown");
    }

    #[test]
    fn test_failure_summary_falls_back() {
        let out = CommandOutput {
            exit_code: 1,
            ..CommandOutput::default()
        };
        assert_eq!(out.failure_summary(), "exit code 1: no output");
        assert!(!out.success());
    }
}
