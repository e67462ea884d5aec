//! Concurrent status collection.
//!
//! Every host gets the whole command set under one time budget. A host whose
//! poll is still running is never polled twice; later callers join the
//! in-flight poll.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use hacore_session::{CommandTable, CommandTableError, RemoteCommand, SessionManager};
use hacore_types::HostId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What one host returned for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStatus {
    /// Standard output per logical command name. Non-zero exits are kept.
    Available {
        /// Outputs keyed by command name.
        outputs: BTreeMap<String, String>,
    },
    /// The host could not be polled.
    Unavailable {
        /// Connect, transport, timeout or cancellation failure.
        reason: String,
    },
}

impl RawStatus {
    /// True if outputs were collected.
    pub fn is_available(&self) -> bool {
        matches!(self, RawStatus::Available { .. })
    }
}

type SharedPoll = Shared<BoxFuture<'static, RawStatus>>;

/// Issues the status command set to hosts.
pub struct Poller {
    manager: Arc<SessionManager>,
    commands: Arc<Vec<RemoteCommand>>,
    host_budget: Duration,
    inflight: Mutex<HashMap<HostId, SharedPoll>>,
}

impl Poller {
    /// Render `command_set` from `table`; fails on names the table lacks.
    pub fn new(
        manager: Arc<SessionManager>,
        table: &CommandTable,
        command_set: &[String],
        host_budget: Duration,
    ) -> Result<Self, CommandTableError> {
        let commands = command_set
            .iter()
            .map(|name| table.render(name, &[]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            manager,
            commands: Arc::new(commands),
            host_budget,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Time budget for one host's whole command set.
    pub fn host_budget(&self) -> Duration {
        self.host_budget
    }

    /// Poll `hosts` concurrently.
    pub async fn poll_all(&self, hosts: &[HostId]) -> BTreeMap<HostId, RawStatus> {
        self.poll_all_with(hosts, &CancellationToken::new()).await
    }

    /// Poll `hosts` concurrently; cancelling `token` stops the commands still
    /// running. Hosts that already finished keep their result.
    pub async fn poll_all_with(
        &self,
        hosts: &[HostId],
        token: &CancellationToken,
    ) -> BTreeMap<HostId, RawStatus> {
        let polls: Vec<(HostId, SharedPoll)> = hosts
            .iter()
            .map(|host| (host.clone(), self.poll_host(host, token)))
            .collect();

        let results = join_all(polls.iter().map(|(_, poll)| poll.clone())).await;

        let mut inflight = self.inflight.lock();
        for (host, poll) in &polls {
            if inflight.get(host).is_some_and(|current| current.ptr_eq(poll)) {
                inflight.remove(host);
            }
        }
        drop(inflight);

        polls.into_iter().map(|(host, _)| host).zip(results).collect()
    }

    fn poll_host(&self, host: &HostId, token: &CancellationToken) -> SharedPoll {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(host) {
            // A finished entry belongs to a caller that went away.
            if existing.peek().is_none() {
                debug!(host = %host, "joining in-flight poll");
                return existing.clone();
            }
        }
        let poll = collect(
            self.manager.clone(),
            host.clone(),
            self.commands.clone(),
            self.host_budget,
            token.clone(),
        )
        .boxed()
        .shared();
        inflight.insert(host.clone(), poll.clone());
        poll
    }
}

async fn collect(
    manager: Arc<SessionManager>,
    host: HostId,
    commands: Arc<Vec<RemoteCommand>>,
    budget: Duration,
    token: CancellationToken,
) -> RawStatus {
    let deadline = Instant::now() + budget;
    let mut outputs = BTreeMap::new();
    for command in commands.iter() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(host = %host, budget_ms = budget.as_millis() as u64, "poll budget exhausted");
            return RawStatus::Unavailable {
                reason: format!("poll budget of {}ms exhausted", budget.as_millis()),
            };
        }
        let timeout = command.timeout_or(remaining).min(remaining);
        match manager.run_with_token(&host, command, timeout, &token).await {
            Ok(output) => {
                if !output.success() {
                    debug!(
                        host = %host,
                        command = %command.name,
                        exit_code = output.exit_code,
                        "status command exited non-zero"
                    );
                }
                outputs.insert(command.name.clone(), output.stdout);
            }
            Err(e) => {
                warn!(host = %host, command = %command.name, error = %e, "host poll failed");
                return RawStatus::Unavailable {
                    reason: e.to_string(),
                };
            }
        }
    }
    RawStatus::Available { outputs }
}
