//! Dry-run previews of a staged edit.
//!
//! Resource-manager ops are replayed into a throwaway shadow configuration on
//! one host and evaluated by the resource manager's own simulator, all inside
//! a single remote command. Storage ops have no evaluator; they are applied
//! to the preview's snapshots structurally.

use crate::edit::{EditOp, EditTarget};
use crate::error::SimulationError;
use crate::translate::cluster_commands;
use crate::working::WorkingSet;
use chrono::Utc;
use hacore_graph::{ClusterGraph, HostSnapshot};
use hacore_parse::{
    parse_cluster_config, parse_cluster_status, ClusterConfig, ClusterStatus, Parsed, ParsedStatus, PeerStatus,
    VolumeStatus,
};
use hacore_session::{CommandTable, RemoteCommand, SessionManager};
use hacore_types::{ConnectionState, DiskState, HostId, VolumeConnection, VolumeId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Line separating the simulated configuration from the simulated status.
pub const STATUS_MARKER: &str = "==hacore-simulated-status==";

const SIM_COMMANDS: &[&str] = &[
    "sim.prepare",
    "sim.select",
    "sim.run",
    "sim.config",
    "sim.status",
    "sim.cleanup",
    "sim.script",
];

/// How much of a preview was evaluated by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreviewMode {
    /// Every op went through the simulator.
    Functional,
    /// Nothing was functionally simulated; ops were applied as written.
    Structural,
    /// Resource-manager ops were simulated, storage ops applied as written.
    Mixed,
}

/// The cluster as it would look after the staged edit.
#[derive(Debug, Clone)]
pub struct PreviewGraph {
    /// The resulting graph.
    pub graph: ClusterGraph,
    /// How much of the edit was simulated.
    pub mode: PreviewMode,
    /// Host the simulator ran on, if it ran.
    pub simulated_on: Option<HostId>,
}

impl PreviewGraph {
    /// False when the preview is "not functionally simulated".
    pub fn is_functional(&self) -> bool {
        self.mode != PreviewMode::Structural
    }
}

impl Deref for PreviewGraph {
    type Target = ClusterGraph;

    fn deref(&self) -> &ClusterGraph {
        &self.graph
    }
}

/// Runs previews through the command table's `sim.*` entries.
pub struct DryRunSimulator {
    manager: Arc<SessionManager>,
    table: Arc<CommandTable>,
    shadow_name: String,
    timeout: Duration,
}

impl DryRunSimulator {
    /// Simulator running `sim.*` commands through `manager`.
    pub fn new(
        manager: Arc<SessionManager>,
        table: Arc<CommandTable>,
        shadow_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            manager,
            table,
            shadow_name: shadow_name.into(),
            timeout,
        }
    }

    /// True if the command table can run simulations at all.
    pub fn can_simulate(&self) -> bool {
        SIM_COMMANDS.iter().all(|name| self.table.contains(name))
    }

    /// Preview `ops` on top of `committed`. `authoritative` runs the
    /// simulation and receives the simulated configuration.
    pub async fn preview(
        &self,
        ops: &[EditOp],
        committed: &ClusterGraph,
        authoritative: Option<&HostId>,
    ) -> Result<PreviewGraph, SimulationError> {
        let base = WorkingSet::from_graph(committed);
        let mut after = base.clone();
        for op in ops {
            after.apply(op);
        }
        let cluster_ops = ops.iter().any(|op| !op.is_storage());
        let storage_ops = ops.iter().any(EditOp::is_storage);
        let functional = cluster_ops && self.can_simulate();

        let mut snapshots = committed.snapshots().clone();
        let mut simulated_on = None;
        if cluster_ops {
            let host = authoritative.ok_or(SimulationError::NoHost)?;
            if functional {
                let (config, status) = self.simulate(ops, &base, host).await?;
                install_cluster_docs(&mut snapshots, host, config, Some(status));
                simulated_on = Some(host.clone());
            } else {
                let mut config = after.config.clone();
                config.version.epoch += 1;
                install_cluster_docs(&mut snapshots, host, config, None);
                info!(host = %host, "no simulator configured; preview not functionally simulated");
            }
        }
        if storage_ops {
            apply_storage(&mut snapshots, ops, &after, committed);
        }

        let mode = match (functional, storage_ops) {
            (true, false) => PreviewMode::Functional,
            (true, true) => PreviewMode::Mixed,
            (false, _) => PreviewMode::Structural,
        };
        debug!(ops = ops.len(), ?mode, "preview built");
        Ok(PreviewGraph {
            graph: ClusterGraph::rebuild_from(snapshots),
            mode,
            simulated_on,
        })
    }

    /// The single remote command that replays the resource-manager part of
    /// `ops` into a fresh shadow and prints the simulated configuration,
    /// [`STATUS_MARKER`] and the simulated status.
    pub fn script(&self, ops: &[EditOp], base: &WorkingSet) -> Result<RemoteCommand, SimulationError> {
        let mut ws = base.clone();
        let mut lines = Vec::new();
        for op in ops {
            if !op.is_storage() {
                lines.extend(cluster_commands(op, &ws, &self.table)?.into_iter().map(|c| c.line));
            }
            ws.apply(op);
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let shadow = format!("{}-{}", self.shadow_name, &run_id[..8]);
        let output = format!("/tmp/hacore-sim-{}.xml", run_id);
        let prepare = self.table.render("sim.prepare", &[("shadow", shadow.as_str())])?;
        let select = self.table.render("sim.select", &[("shadow", shadow.as_str())])?;
        let run = self.table.render("sim.run", &[("output", output.as_str())])?;
        let config = self.table.render("sim.config", &[("output", output.as_str())])?;
        let status = self.table.render("sim.status", &[("output", output.as_str())])?;
        let cleanup = self
            .table
            .render("sim.cleanup", &[("shadow", shadow.as_str()), ("output", output.as_str())])?;
        let replay = if lines.is_empty() { ":".to_string() } else { lines.join("; ") };

        Ok(self.table.render(
            "sim.script",
            &[
                ("cleanup", cleanup.line.as_str()),
                ("prepare", prepare.line.as_str()),
                ("select", select.line.as_str()),
                ("ops", replay.as_str()),
                ("run", run.line.as_str()),
                ("config", config.line.as_str()),
                ("marker", STATUS_MARKER),
                ("status", status.line.as_str()),
            ],
        )?)
    }

    async fn simulate(
        &self,
        ops: &[EditOp],
        base: &WorkingSet,
        host: &HostId,
    ) -> Result<(ClusterConfig, ClusterStatus), SimulationError> {
        let script = self.script(ops, base)?;
        info!(host = %host, ops = ops.len(), "running dry-run simulation");
        let output = self.manager.run(host, &script, script.timeout_or(self.timeout)).await?;
        if !output.success() {
            warn!(host = %host, exit_code = output.exit_code, "simulation failed");
            return Err(SimulationError::Failed {
                host: host.clone(),
                exit_code: output.exit_code,
                detail: output.failure_summary(),
            });
        }
        parse_output(&output.stdout)
    }
}

/// Split simulator output at [`STATUS_MARKER`] and parse both halves.
pub fn parse_output(stdout: &str) -> Result<(ClusterConfig, ClusterStatus), SimulationError> {
    let (config_text, status_text) = stdout
        .split_once(STATUS_MARKER)
        .ok_or_else(|| SimulationError::Unparsable("status marker missing from simulator output".to_string()))?;
    let config = usable("configuration", parse_cluster_config(config_text.trim()))?;
    let status = usable("status", parse_cluster_status(status_text.trim()))?;
    Ok((config, status))
}

fn usable<T: Default + PartialEq>(what: &str, parsed: Parsed<T>) -> Result<T, SimulationError> {
    if let Some(first) = parsed.unparsed.first() {
        if parsed.value == T::default() {
            return Err(SimulationError::Unparsable(format!("simulated {}: {}", what, first)));
        }
        warn!(document = what, fragments = parsed.unparsed.len(), "partially parsed simulation output");
    }
    Ok(parsed.value)
}

/// Make `host` the only source of resource-manager configuration (and, with
/// `status`, of resource-manager status) in `snapshots`.
fn install_cluster_docs(
    snapshots: &mut BTreeMap<HostId, HostSnapshot>,
    host: &HostId,
    config: ClusterConfig,
    status: Option<ClusterStatus>,
) {
    for (id, snapshot) in snapshots.iter_mut() {
        if id == host {
            continue;
        }
        if let Some(parsed) = snapshot.status_mut() {
            parsed.cluster_config = None;
            if status.is_some() {
                parsed.cluster_status = None;
            }
        }
    }

    let blank = || HostSnapshot::available(Parsed::new(ParsedStatus::default()), ConnectionState::Connected, Utc::now());
    let snapshot = snapshots.entry(host.clone()).or_insert_with(blank);
    if !snapshot.is_available() {
        *snapshot = blank();
    }
    if let Some(parsed) = snapshot.status_mut() {
        parsed.cluster_config = Some(config);
        if let Some(status) = status {
            parsed.cluster_status = Some(status);
        }
    }
}

/// Rewrite the storage documents of every volume a storage op touches so the
/// rebuild sees the volume as the edit leaves it.
fn apply_storage(
    snapshots: &mut BTreeMap<HostId, HostSnapshot>,
    ops: &[EditOp],
    after: &WorkingSet,
    committed: &ClusterGraph,
) {
    let touched: BTreeSet<VolumeId> = ops
        .iter()
        .filter(|op| op.is_storage())
        .filter_map(|op| match op.subject() {
            EditTarget::Volume(id) => Some(id),
            _ => None,
        })
        .collect();

    for snapshot in snapshots.values_mut() {
        if let Some(parsed) = snapshot.status_mut() {
            if let Some(config) = parsed.storage_config.as_mut() {
                config.volumes.retain(|v| !touched.contains(&v.id));
            }
            if let Some(status) = parsed.storage_status.as_mut() {
                status.volumes.retain(|v| !touched.contains(&v.id));
            }
        }
    }

    let disk = |volume: &VolumeId, host: &HostId| {
        committed
            .volume(volume)
            .and_then(|v| v.leg(host))
            .map(|l| l.disk_state)
            .unwrap_or(DiskState::Inconsistent)
    };

    for id in &touched {
        let Some(working) = after.volumes.get(id) else {
            continue;
        };
        let connection = if working.connected {
            VolumeConnection::Connected
        } else {
            VolumeConnection::StandAlone
        };
        for leg in &working.def.legs {
            let Some(parsed) = snapshots.get_mut(&leg.host).and_then(HostSnapshot::status_mut) else {
                continue;
            };
            let peers = working
                .def
                .legs
                .iter()
                .filter(|p| p.host != leg.host)
                .map(|p| PeerStatus {
                    host: p.host.clone(),
                    connection,
                    role: working.role(&p.host),
                    disk: disk(id, &p.host),
                    replication: None,
                    sync_percent: None,
                })
                .collect();
            parsed
                .storage_config
                .get_or_insert_with(Default::default)
                .volumes
                .push(working.def.clone());
            parsed
                .storage_status
                .get_or_insert_with(Default::default)
                .volumes
                .push(VolumeStatus {
                    id: id.clone(),
                    role: working.role(&leg.host),
                    disk: disk(id, &leg.host),
                    peers,
                });
        }
    }
}
