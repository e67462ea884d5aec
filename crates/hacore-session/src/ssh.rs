//! OpenSSH client transport.
//!
//! Every host gets a multiplexed master connection (`ControlMaster=auto`), so
//! after the first authentication each command is a cheap channel on the
//! existing link. Password authentication goes through `sshpass -e`;
//! passphrase-protected keys through an askpass helper that echoes
//! `HACORE_ASKPASS_SECRET`.

use crate::host::{AuthMethod, HostConfig};
use crate::transport::{CommandOutput, ExecRequest, RemoteTransport, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable the askpass helper reads the key passphrase from.
pub const ASKPASS_SECRET_ENV: &str = "HACORE_ASKPASS_SECRET";

/// `ssh` exit code for connection-level failures.
const SSH_ERROR_EXIT: i32 = 255;
/// `sshpass` exit code for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// `sshpass` exit code for an unknown host key.
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// OpenSSH client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOptions {
    /// `ssh` binary.
    pub ssh_program: PathBuf,
    /// `sshpass` binary for password authentication.
    pub sshpass_program: PathBuf,
    /// Askpass helper for passphrase-protected keys.
    pub askpass_program: Option<PathBuf>,
    /// Directory for master connection sockets.
    pub control_dir: PathBuf,
    /// Seconds an idle master connection is kept.
    pub control_persist_secs: u64,
    /// `StrictHostKeyChecking` value.
    pub strict_host_key_checking: String,
    /// Extra `ssh` arguments, inserted before the destination.
    pub extra_args: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            sshpass_program: PathBuf::from("sshpass"),
            askpass_program: None,
            control_dir: std::env::temp_dir().join("hacore-ssh"),
            control_persist_secs: 300,
            strict_host_key_checking: "accept-new".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// [`RemoteTransport`] over the system OpenSSH client.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    /// Create a transport.
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Client settings.
    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn control_path(&self) -> String {
        self.options.control_dir.join("%C").display().to_string()
    }

    /// `ssh` arguments up to and including the destination.
    pub fn ssh_args(&self, host: &HostConfig, auth: &AuthMethod) -> Vec<String> {
        let connect_secs = host.connect_timeout.as_secs().max(1);
        let mut args = vec![
            "-p".to_string(),
            host.port.to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path()),
            "-o".to_string(),
            format!("ControlPersist={}s", self.options.control_persist_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.options.strict_host_key_checking),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_secs),
            "-o".to_string(),
            "ServerAliveInterval=5".to_string(),
        ];
        match auth {
            AuthMethod::Key { identity_file } => {
                push_opt(&mut args, "BatchMode=yes");
                push_opt(&mut args, "PreferredAuthentications=publickey");
                if let Some(file) = identity_file {
                    push_opt(&mut args, "IdentitiesOnly=yes");
                    args.push("-i".to_string());
                    args.push(file.display().to_string());
                }
            }
            AuthMethod::Password { .. } => {
                push_opt(&mut args, "PreferredAuthentications=password,keyboard-interactive");
                push_opt(&mut args, "PubkeyAuthentication=no");
                push_opt(&mut args, "NumberOfPasswordPrompts=1");
            }
            AuthMethod::Interactive { identity_file, .. } => {
                push_opt(&mut args, "PreferredAuthentications=publickey");
                push_opt(&mut args, "NumberOfPasswordPrompts=1");
                if let Some(file) = identity_file {
                    push_opt(&mut args, "IdentitiesOnly=yes");
                    args.push("-i".to_string());
                    args.push(file.display().to_string());
                }
            }
        }
        args.extend(self.options.extra_args.iter().cloned());
        args.push(host.destination());
        args
    }

    fn command(&self, host: &HostConfig, auth: &AuthMethod) -> Result<Command, TransportError> {
        let mut cmd = match auth {
            AuthMethod::Password { password } => {
                let mut cmd = Command::new(&self.options.sshpass_program);
                cmd.arg("-e").arg(&self.options.ssh_program).env("SSHPASS", password);
                cmd
            }
            AuthMethod::Interactive { passphrase, .. } => {
                let askpass = self.options.askpass_program.as_ref().ok_or_else(|| {
                    TransportError::Spawn("no askpass helper configured".to_string())
                })?;
                let mut cmd = Command::new(&self.options.ssh_program);
                cmd.env("SSH_ASKPASS", askpass)
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(ASKPASS_SECRET_ENV, passphrase);
                cmd
            }
            AuthMethod::Key { .. } => Command::new(&self.options.ssh_program),
        };
        cmd.args(self.ssh_args(host, auth))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn run(
        &self,
        mut cmd: Command,
        stdin: Option<String>,
    ) -> Result<CommandOutput, TransportError> {
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(e.to_string()))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // A remote side that never reads stdin closes the pipe early.
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "remote side closed stdin early");
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn push_opt(args: &mut Vec<String>, value: &str) {
    args.push("-o".to_string());
    args.push(value.to_string());
}

/// Map a finished `ssh` invocation to a transport failure, if it was one.
///
/// Exit code 255 is also a legal remote exit code, so it only counts as a
/// transport failure when stderr carries an ssh-level message. `sshpass`
/// codes are only meaningful while authenticating.
pub fn classify_failure(exit_code: i32, stderr: &str, authenticating: bool) -> Option<TransportError> {
    if authenticating {
        match exit_code {
            SSHPASS_BAD_PASSWORD => {
                return Some(TransportError::AuthRejected("password rejected".to_string()))
            }
            SSHPASS_HOST_KEY_UNKNOWN => {
                return Some(TransportError::Network("host key unknown".to_string()))
            }
            _ => {}
        }
    }
    if exit_code != SSH_ERROR_EXIT {
        return None;
    }
    let line = stderr
        .lines()
        .map(str::trim)
        .find(|l| is_ssh_message(l))?
        .to_string();
    if line.contains("Permission denied") || line.contains("Too many authentication failures") {
        Some(TransportError::AuthRejected(line))
    } else {
        Some(TransportError::Network(line))
    }
}

fn is_ssh_message(line: &str) -> bool {
    const MARKERS: &[&str] = &[
        "Permission denied",
        "Too many authentication failures",
        "Connection refused",
        "Connection timed out",
        "Connection closed by",
        "Connection reset",
        "Could not resolve hostname",
        "No route to host",
        "Host key verification failed",
        "Broken pipe",
        "kex_exchange_identification",
        "Control socket connect",
        "mux_client",
    ];
    line.starts_with("ssh:") || MARKERS.iter().any(|m| line.contains(m))
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn open(&self, host: &HostConfig, auth: &AuthMethod) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.options.control_dir)
            .await
            .map_err(|e| TransportError::Spawn(format!("control dir: {}", e)))?;
        let mut cmd = self.command(host, auth)?;
        cmd.arg("--").arg("true");
        let output = self.run(cmd, None).await?;
        if let Some(err) = classify_failure(output.exit_code, &output.stderr, true) {
            return Err(err);
        }
        if !output.success() {
            return Err(TransportError::Network(output.failure_summary()));
        }
        Ok(())
    }

    async fn exec(
        &self,
        host: &HostConfig,
        auth: &AuthMethod,
        request: ExecRequest,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = self.command(host, auth)?;
        cmd.arg("--").arg(&request.script);
        let output = self.run(cmd, request.stdin).await?;
        match classify_failure(output.exit_code, &output.stderr, false) {
            Some(err) => Err(err),
            None => Ok(output),
        }
    }

    async fn close(&self, host: &HostConfig) {
        let result = Command::new(&self.options.ssh_program)
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path()))
            .arg("-p")
            .arg(host.port.to_string())
            .arg(host.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        if let Err(e) = result {
            warn!(host = %host.id, error = %e, "failed to close master connection");
        }
    }
}
