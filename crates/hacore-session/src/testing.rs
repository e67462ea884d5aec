//! In-memory transport for tests and offline tooling.
//!
//! Replies are scripted per host by substring match on the wrapped script; the
//! most recently added matching rule wins, so a test can change what a host
//! reports between polls. Process-group kills are answered automatically and
//! counted.

use crate::host::{AuthKind, AuthMethod, HostConfig};
use crate::transport::{CommandOutput, ExecRequest, RemoteTransport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const ANY_HOST: &str = "*";

/// A scripted reply.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Outcome,
    delay: Duration,
}

#[derive(Debug, Clone)]
enum Outcome {
    Output { stdout: String, stderr: String, exit_code: i32 },
    Network(String),
    Hang,
}

impl ScriptedReply {
    /// Exit 0 with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Output {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: 0,
            },
            delay: Duration::ZERO,
        }
    }

    /// Non-zero exit with `stderr`.
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Output {
                stdout: String::new(),
                stderr: stderr.into(),
                exit_code: code,
            },
            delay: Duration::ZERO,
        }
    }

    /// Never completes.
    pub fn hang() -> Self {
        Self {
            outcome: Outcome::Hang,
            delay: Duration::ZERO,
        }
    }

    /// Transport failure mid-command.
    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Network(detail.into()),
            delay: Duration::ZERO,
        }
    }

    /// Reply only after `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct HostScript {
    rules: Vec<(String, ScriptedReply)>,
    accepted: Option<HashSet<AuthKind>>,
    refuse: bool,
    open_delay: Duration,
    fail_execs: usize,
    open_attempts: Vec<AuthKind>,
    executed: Vec<String>,
    kills: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Scripted [`RemoteTransport`].
#[derive(Default)]
pub struct ScriptedTransport {
    hosts: Mutex<HashMap<String, HostScript>>,
}

struct InFlight<'a> {
    transport: &'a ScriptedTransport,
    host: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(script) = self.transport.hosts.lock().get_mut(&self.host) {
            script.in_flight = script.in_flight.saturating_sub(1);
        }
    }
}

impl ScriptedTransport {
    /// Transport where every host accepts any credential and every command
    /// exits 127.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_host<R>(&self, host: &str, f: impl FnOnce(&mut HostScript) -> R) -> R {
        let mut hosts = self.hosts.lock();
        f(hosts.entry(host.to_string()).or_default())
    }

    /// Reply to scripts on `host` containing `needle`.
    pub fn on(&self, host: &str, needle: &str, reply: ScriptedReply) {
        self.with_host(host, |s| s.rules.push((needle.to_string(), reply)));
    }

    /// Reply to scripts on every host containing `needle`. Host rules win.
    pub fn on_any(&self, needle: &str, reply: ScriptedReply) {
        self.on(ANY_HOST, needle, reply);
    }

    /// Accept only these authentication kinds on `host`.
    pub fn accept_only(&self, host: &str, kinds: &[AuthKind]) {
        self.with_host(host, |s| s.accepted = Some(kinds.iter().copied().collect()));
    }

    /// Make `host` unreachable.
    pub fn refuse_connections(&self, host: &str) {
        self.with_host(host, |s| s.refuse = true);
    }

    /// Make `host` reachable again.
    pub fn allow_connections(&self, host: &str) {
        self.with_host(host, |s| s.refuse = false);
    }

    /// Delay every authentication attempt on `host`.
    pub fn delay_open(&self, host: &str, delay: Duration) {
        self.with_host(host, |s| s.open_delay = delay);
    }

    /// Drop the link for the next `count` commands on `host`.
    pub fn fail_next_execs(&self, host: &str, count: usize) {
        self.with_host(host, |s| s.fail_execs = count);
    }

    /// Scripts that reached `host`, excluding kills and dropped links.
    pub fn executed(&self, host: &str) -> Vec<String> {
        self.with_host(host, |s| s.executed.clone())
    }

    /// Process-group kills sent to `host`.
    pub fn kills(&self, host: &str) -> usize {
        self.with_host(host, |s| s.kills)
    }

    /// Authentication attempts on `host`, in order.
    pub fn open_attempts(&self, host: &str) -> Vec<AuthKind> {
        self.with_host(host, |s| s.open_attempts.clone())
    }

    /// Highest number of simultaneous commands seen on `host`.
    pub fn max_concurrent_execs(&self, host: &str) -> usize {
        self.with_host(host, |s| s.max_in_flight)
    }

    fn lookup(&self, host: &str, script: &str) -> Option<ScriptedReply> {
        let hosts = self.hosts.lock();
        let find = |key: &str| {
            hosts.get(key).and_then(|s| {
                s.rules
                    .iter()
                    .rev()
                    .find(|(needle, _)| script.contains(needle.as_str()))
                    .map(|(_, reply)| reply.clone())
            })
        };
        find(host).or_else(|| find(ANY_HOST))
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn open(&self, host: &HostConfig, auth: &AuthMethod) -> Result<(), TransportError> {
        let (refuse, accepted, delay) = self.with_host(host.id.as_str(), |s| {
            s.open_attempts.push(auth.kind());
            (s.refuse, s.accepted.clone(), s.open_delay)
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if refuse {
            return Err(TransportError::Network(format!(
                "ssh: connect to host {} port {}: Connection refused",
                host.address, host.port
            )));
        }
        match accepted {
            Some(kinds) if !kinds.contains(&auth.kind()) => Err(TransportError::AuthRejected(
                "Permission denied (publickey,password)".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn exec(
        &self,
        host: &HostConfig,
        _auth: &AuthMethod,
        request: ExecRequest,
    ) -> Result<CommandOutput, TransportError> {
        let key = host.id.as_str().to_string();
        if request.script.contains("kill -TERM") {
            self.with_host(&key, |s| s.kills += 1);
            return Ok(CommandOutput::default());
        }

        let dropped = self.with_host(&key, |s| {
            if s.refuse {
                return true;
            }
            if s.fail_execs > 0 {
                s.fail_execs -= 1;
                return true;
            }
            s.executed.push(request.script.clone());
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            false
        });
        if dropped {
            return Err(TransportError::Network("connection reset by peer".to_string()));
        }
        let _guard = InFlight {
            transport: self,
            host: key.clone(),
        };

        let reply = self
            .lookup(&key, &request.script)
            .unwrap_or_else(|| ScriptedReply::exit(127, "command not found"));
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        match reply.outcome {
            Outcome::Output {
                stdout,
                stderr,
                exit_code,
            } => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
                duration_ms: reply.delay.as_millis() as u64,
            }),
            Outcome::Network(detail) => Err(TransportError::Network(detail)),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn close(&self, _host: &HostConfig) {}
}
