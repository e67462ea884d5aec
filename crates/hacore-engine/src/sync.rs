//! Poll, parse, rebuild, publish.

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::poller::{Poller, RawStatus};
use chrono::Utc;
use hacore_graph::{ClusterGraph, GraphStore, HostSnapshot};
use hacore_parse::parse_host_status;
use hacore_session::{RemoteTransport, SessionManager};
use hacore_types::{HostId, VolumeId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Generation the rebuilt graph was published under.
    pub generation: u64,
    /// Registered hosts whose poll failed.
    pub unavailable: Vec<HostId>,
    /// Volumes in split-brain.
    pub split_brain: Vec<VolumeId>,
    /// Number of rebuild warnings.
    pub warnings: usize,
}

impl SyncReport {
    /// True if every host answered and no volume is split.
    pub fn is_healthy(&self) -> bool {
        self.unavailable.is_empty() && self.split_brain.is_empty()
    }
}

/// Keeps the published graph in step with the cluster.
pub struct ClusterSync {
    manager: Arc<SessionManager>,
    poller: Poller,
    store: Arc<GraphStore>,
    interval: Duration,
}

impl ClusterSync {
    /// Sync over `manager`, publishing what `poller` gathers to `store`.
    pub fn new(manager: Arc<SessionManager>, poller: Poller, store: Arc<GraphStore>, interval: Duration) -> Self {
        Self {
            manager,
            poller,
            store,
            interval,
        }
    }

    /// Register the configured hosts on `transport` and wire up a poller.
    pub fn from_config(config: &EngineConfig, transport: Arc<dyn RemoteTransport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let manager = Arc::new(SessionManager::new(transport, config.session_options()));
        for host in config.host_configs() {
            manager.add_host(host);
        }
        let table = config.command_table()?;
        let poller = Poller::new(manager.clone(), &table, &config.poll_commands, config.poll_timeout())?;
        Ok(Self::new(
            manager,
            poller,
            Arc::new(GraphStore::new()),
            config.poll_interval(),
        ))
    }

    /// Sessions to the cluster hosts.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Where published graphs live.
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Poll every registered host and publish a fresh graph.
    pub async fn resync(&self) -> SyncReport {
        self.resync_with(&CancellationToken::new()).await
    }

    /// [`resync`](Self::resync) whose polls stop when `token` is cancelled.
    pub async fn resync_with(&self, token: &CancellationToken) -> SyncReport {
        let graph = self.rebuild(token).await;
        self.publish(graph)
    }

    async fn rebuild(&self, token: &CancellationToken) -> ClusterGraph {
        let hosts = self.manager.hosts();
        let raw = self.poller.poll_all_with(&hosts, token).await;
        let taken_at = Utc::now();

        let mut snapshots = BTreeMap::new();
        for (host, status) in raw {
            let connection = self.manager.state(&host).unwrap_or_default();
            let snapshot = match status {
                RawStatus::Available { outputs } => {
                    let parsed = parse_host_status(&outputs);
                    if !parsed.is_clean() {
                        warn!(host = %host, fragments = parsed.unparsed.len(), "unparsed status output");
                        for fragment in &parsed.unparsed {
                            debug!(host = %host, %fragment, "unparsed fragment");
                        }
                    }
                    if let Ok(session) = self.manager.session(&host) {
                        session.mark_snapshot(taken_at);
                    }
                    HostSnapshot::available(parsed, connection, taken_at)
                }
                RawStatus::Unavailable { reason } => HostSnapshot::unavailable(reason, connection, taken_at),
            };
            snapshots.insert(host, snapshot);
        }
        ClusterGraph::rebuild_from(snapshots)
    }

    fn publish(&self, graph: ClusterGraph) -> SyncReport {
        let unavailable: Vec<HostId> = graph.unavailable_hosts().iter().map(|h| h.id.clone()).collect();
        let split_brain: Vec<VolumeId> = graph.split_brain_volumes().iter().map(|v| v.id.clone()).collect();
        for host in graph.unavailable_hosts() {
            warn!(host = %host.id, reason = host.unavailable.as_deref().unwrap_or_default(), "host unavailable");
        }
        for volume in &split_brain {
            warn!(volume = %volume, "split-brain detected");
        }
        let warnings = graph.warnings().len();
        let generation = self.store.publish(graph);
        SyncReport {
            generation,
            unavailable,
            split_brain,
            warnings,
        }
    }

    /// Resync every interval until `shutdown` is cancelled. A poll cut short
    /// by shutdown is not published.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "sync loop started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let graph = self.rebuild(&shutdown).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let report = self.publish(graph);
                    debug!(generation = report.generation, "resync complete");
                }
            }
        }
        info!("sync loop stopped");
    }
}
