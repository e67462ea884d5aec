//! Staged edits and their transactional commit.
//!
//! An [`EditSession`] collects [`EditOp`]s against the committed graph. Every
//! staged op is validated against the committed configuration plus the ops
//! staged before it, and locks its targets so no other live session can stage
//! against them. Commit translates the normalized edit into per-host command
//! lists and runs them op by op; nothing is rolled back. After a partial
//! failure only the unfinished ops stay staged, and a retry skips the hosts an
//! op already reached.

use crate::config::EngineConfig;
use crate::error::{ConfigError, EditError, SimulationError};
use crate::simulate::{DryRunSimulator, PreviewGraph};
use crate::sync::{ClusterSync, SyncReport};
use crate::translate::{self, HostPlan};
use crate::working::WorkingSet;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use hacore_graph::ClusterGraph;
use hacore_parse::{ConstraintDef, ResourceDef, VolumeDef};
use hacore_session::{CommandTable, SessionManager};
use hacore_types::{ConnectionState, ConstraintId, HostId, LegRole, ResourceId, VolumeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Which attribute set a [`EditOp::SetAttribute`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeScope {
    /// Agent parameters.
    Instance,
    /// Resource-manager meta attributes.
    Meta,
}

impl fmt::Display for AttributeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeScope::Instance => f.write_str("instance"),
            AttributeScope::Meta => f.write_str("meta"),
        }
    }
}

/// One staged change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    /// Create a primitive, or a group or clone wrapping existing resources.
    AddResource {
        /// The new resource.
        spec: ResourceDef,
    },
    /// Delete a resource and anything it wraps.
    RemoveResource {
        /// Resource to delete.
        id: ResourceId,
    },
    /// `value: None` deletes the attribute.
    SetAttribute {
        /// Resource carrying the attribute.
        resource: ResourceId,
        /// Attribute set written.
        scope: AttributeScope,
        /// Attribute name.
        name: String,
        /// New value.
        value: Option<String>,
    },
    /// Create an ordering or colocation constraint.
    AddConstraint {
        /// The new constraint.
        constraint: ConstraintDef,
    },
    /// Delete a constraint.
    RemoveConstraint {
        /// Constraint to delete.
        id: ConstraintId,
    },
    /// Create a replicated volume on its two legs.
    AddVolume {
        /// The new volume.
        spec: VolumeDef,
    },
    /// Take a volume down and drop its configuration.
    RemoveVolume {
        /// Volume to remove.
        id: VolumeId,
    },
    /// Promote or demote one leg.
    SetVolumeRole {
        /// Volume the leg belongs to.
        volume: VolumeId,
        /// Host carrying the leg.
        host: HostId,
        /// Role to take.
        role: LegRole,
    },
    /// Connect or disconnect a volume's legs.
    SetVolumeConnection {
        /// Volume to change.
        volume: VolumeId,
        /// Whether the legs replicate.
        connected: bool,
    },
}

impl EditOp {
    /// True for ops executed by the storage layer on the volume's legs.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EditOp::AddVolume { .. }
                | EditOp::RemoveVolume { .. }
                | EditOp::SetVolumeRole { .. }
                | EditOp::SetVolumeConnection { .. }
        )
    }

    /// The entity the op creates, changes or removes.
    pub fn subject(&self) -> EditTarget {
        match self {
            EditOp::AddResource { spec } => EditTarget::Resource(spec.id.clone()),
            EditOp::RemoveResource { id } => EditTarget::Resource(id.clone()),
            EditOp::SetAttribute { resource, .. } => EditTarget::Resource(resource.clone()),
            EditOp::AddConstraint { constraint } => EditTarget::Constraint(constraint.id.clone()),
            EditOp::RemoveConstraint { id } => EditTarget::Constraint(id.clone()),
            EditOp::AddVolume { spec } => EditTarget::Volume(spec.id.clone()),
            EditOp::RemoveVolume { id } => EditTarget::Volume(id.clone()),
            EditOp::SetVolumeRole { volume, .. } | EditOp::SetVolumeConnection { volume, .. } => {
                EditTarget::Volume(volume.clone())
            }
        }
    }

    /// Everything the op locks: its subject plus the resources a new group
    /// or clone takes over.
    pub fn targets(&self) -> Vec<EditTarget> {
        let mut targets = vec![self.subject()];
        if let EditOp::AddResource { spec } = self {
            targets.extend(spec.children.iter().cloned().map(EditTarget::Resource));
        }
        targets
    }

    fn attribute_key(&self) -> Option<(&ResourceId, AttributeScope, &str)> {
        match self {
            EditOp::SetAttribute {
                resource, scope, name, ..
            } => Some((resource, *scope, name.as_str())),
            _ => None,
        }
    }

    /// True if staging `later` after this op undoes it.
    fn cancels(&self, later: &EditOp) -> bool {
        match (self, later) {
            // A group wrapping existing resources takes them along on removal.
            (EditOp::AddResource { spec }, EditOp::RemoveResource { id }) => {
                &spec.id == id && spec.children.is_empty()
            }
            (EditOp::AddConstraint { constraint }, EditOp::RemoveConstraint { id }) => &constraint.id == id,
            (EditOp::AddVolume { spec }, EditOp::RemoveVolume { id }) => &spec.id == id,
            _ => false,
        }
    }
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditOp::AddResource { spec } => write!(f, "add resource {}", spec.id),
            EditOp::RemoveResource { id } => write!(f, "remove resource {}", id),
            EditOp::SetAttribute {
                resource,
                scope,
                name,
                value: Some(value),
            } => write!(f, "set {} attribute {}.{}={}", scope, resource, name, value),
            EditOp::SetAttribute {
                resource,
                scope,
                name,
                value: None,
            } => write!(f, "delete {} attribute {}.{}", scope, resource, name),
            EditOp::AddConstraint { constraint } => write!(f, "add constraint {}", constraint.id),
            EditOp::RemoveConstraint { id } => write!(f, "remove constraint {}", id),
            EditOp::AddVolume { spec } => write!(f, "add volume {}", spec.id),
            EditOp::RemoveVolume { id } => write!(f, "remove volume {}", id),
            EditOp::SetVolumeRole { volume, host, role } => {
                write!(f, "make volume {} {} on {}", volume, role.as_str(), host)
            }
            EditOp::SetVolumeConnection { volume, connected: true } => write!(f, "connect volume {}", volume),
            EditOp::SetVolumeConnection {
                volume,
                connected: false,
            } => write!(f, "disconnect volume {}", volume),
        }
    }
}

/// A lockable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EditTarget {
    /// A resource.
    Resource(ResourceId),
    /// A constraint.
    Constraint(ConstraintId),
    /// A storage volume.
    Volume(VolumeId),
}

impl fmt::Display for EditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditTarget::Resource(id) => write!(f, "resource {}", id),
            EditTarget::Constraint(id) => write!(f, "constraint {}", id),
            EditTarget::Volume(id) => write!(f, "volume {}", id),
        }
    }
}

/// Normalize `staged` against the committed state: Add/Remove pairs cancel
/// together with the ops between them on the same entity, only the last write
/// of an attribute survives, and writes restating the current value are
/// dropped. Surviving ops keep their staged order.
pub fn normalize(staged: &[EditOp], committed: &WorkingSet) -> Vec<EditOp> {
    let mut keep = vec![true; staged.len()];

    for (i, op) in staged.iter().enumerate() {
        if !keep[i] {
            continue;
        }
        let Some(j) = (i + 1..staged.len()).find(|&j| keep[j] && op.cancels(&staged[j])) else {
            continue;
        };
        let subject = op.subject();
        for k in i..=j {
            if k == i || k == j || staged[k].subject() == subject {
                keep[k] = false;
            }
        }
    }

    for (i, op) in staged.iter().enumerate() {
        let Some(key) = op.attribute_key() else {
            continue;
        };
        if keep[i] && staged[i + 1..]
            .iter()
            .zip(&keep[i + 1..])
            .any(|(later, kept)| *kept && later.attribute_key() == Some(key))
        {
            keep[i] = false;
        }
    }

    let mut ws = committed.clone();
    let mut out = Vec::new();
    for (op, kept) in staged.iter().zip(keep) {
        if !kept {
            continue;
        }
        if let EditOp::SetAttribute {
            resource,
            scope,
            name,
            value,
        } = op
        {
            if ws.attribute(resource, *scope, name) == value.as_ref() {
                continue;
            }
        }
        ws.apply(op);
        out.push(op.clone());
    }
    out
}

/// Why a host was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// An earlier op failed.
    DueToEarlierFailure,
}

/// What happened to one op on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HostOutcome {
    /// Every command succeeded.
    Applied,
    /// First failing command and why.
    Failed(String),
    /// Not attempted.
    Skipped(SkipReason),
}

impl HostOutcome {
    /// True for [`HostOutcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, HostOutcome::Applied)
    }
}

/// Outcome of one op across the hosts it touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpReport {
    /// The op as committed.
    pub op: EditOp,
    /// Outcome per host the op touched.
    pub hosts: BTreeMap<HostId, HostOutcome>,
}

/// Commit outcome, reported verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitResult {
    /// One report per normalized op, in commit order.
    pub ops: Vec<OpReport>,
    /// The poll that followed the commit.
    pub resync: SyncReport,
}

impl CommitResult {
    /// True only if every op was applied on every host.
    pub fn is_success(&self) -> bool {
        self.ops.iter().all(|r| r.hosts.values().all(HostOutcome::is_applied))
    }

    /// `(op, host, reason)` for every failed pair.
    pub fn failures(&self) -> Vec<(&EditOp, &HostId, &str)> {
        self.ops
            .iter()
            .flat_map(|r| {
                r.hosts.iter().filter_map(move |(host, outcome)| match outcome {
                    HostOutcome::Failed(reason) => Some((&r.op, host, reason.as_str())),
                    _ => None,
                })
            })
            .collect()
    }
}

struct EngineShared {
    sync: Arc<ClusterSync>,
    table: Arc<CommandTable>,
    simulator: DryRunSimulator,
    locks: DashMap<EditTarget, Uuid>,
    command_timeout: Duration,
}

/// Hands out edit sessions and arbitrates their locks.
#[derive(Clone)]
pub struct EditEngine {
    inner: Arc<EngineShared>,
}

impl EditEngine {
    /// Engine committing through `sync` with commands from `table`.
    pub fn new(
        sync: Arc<ClusterSync>,
        table: Arc<CommandTable>,
        shadow_name: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        let simulator = DryRunSimulator::new(
            sync.manager().clone(),
            table.clone(),
            shadow_name,
            command_timeout,
        );
        Self {
            inner: Arc::new(EngineShared {
                sync,
                table,
                simulator,
                locks: DashMap::new(),
                command_timeout,
            }),
        }
    }

    /// Engine using the configured command table, shadow name and timeout.
    pub fn from_config(sync: Arc<ClusterSync>, config: &EngineConfig) -> Result<Self, ConfigError> {
        let table = Arc::new(config.command_table()?);
        Ok(Self::new(
            sync,
            table,
            config.shadow_name.clone(),
            config.command_timeout(),
        ))
    }

    /// Open an empty session.
    pub fn open_session(&self) -> EditSession {
        let id = Uuid::new_v4();
        debug!(session = %id, "edit session opened");
        EditSession {
            id,
            inner: self.inner.clone(),
            staged: Vec::new(),
            generation: 0,
            preview: None,
            held: BTreeSet::new(),
            applied: Vec::new(),
        }
    }

    /// Targets currently locked, with their holders.
    pub fn locked_targets(&self) -> BTreeMap<EditTarget, Uuid> {
        self.inner
            .locks
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

type CachedPreview = (u64, u64, Result<Arc<PreviewGraph>, SimulationError>);

/// One operator's staged edit.
pub struct EditSession {
    id: Uuid,
    inner: Arc<EngineShared>,
    staged: Vec<EditOp>,
    generation: u64,
    preview: Option<CachedPreview>,
    held: BTreeSet<EditTarget>,
    /// Hosts a still-staged op already reached in an earlier commit.
    applied: Vec<(EditOp, BTreeSet<HostId>)>,
}

/// First connected host, else the first host.
fn pick_authoritative(manager: &SessionManager, hosts: &[HostId]) -> Option<HostId> {
    hosts
        .iter()
        .find(|h| manager.state(h) == Some(ConnectionState::Connected))
        .or_else(|| hosts.first())
        .cloned()
}

impl EditSession {
    /// Lock holder id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ops in staged order, before normalization.
    pub fn staged(&self) -> &[EditOp] {
        &self.staged
    }

    /// Bumped by every stage, commit and discard.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn committed(&self) -> Arc<ClusterGraph> {
        self.inner.sync.store().load()
    }

    fn working_set(&self) -> WorkingSet {
        let mut ws = WorkingSet::from_graph(&self.committed());
        for op in &self.staged {
            ws.apply(op);
        }
        ws
    }

    /// Validate `op` against the committed graph plus the staged ops and
    /// append it. A rejected op leaves the edit unchanged.
    pub fn stage(&mut self, op: EditOp) -> Result<(), EditError> {
        let mut acquired = Vec::new();
        for target in op.targets() {
            if self.held.contains(&target) || acquired.contains(&target) {
                continue;
            }
            match self.inner.locks.entry(target.clone()) {
                Entry::Occupied(entry) => {
                    let holder = *entry.get();
                    drop(entry);
                    self.release(&acquired);
                    debug!(session = %self.id, %target, %holder, "target locked by another session");
                    return Err(EditError::AlreadyBeingEdited { target, holder });
                }
                Entry::Vacant(entry) => {
                    entry.insert(self.id);
                    acquired.push(target);
                }
            }
        }

        if let Err(e) = self.working_set().validate(&op) {
            self.release(&acquired);
            debug!(session = %self.id, op = %op, error = %e, "op rejected");
            return Err(e);
        }

        info!(session = %self.id, op = %op, "op staged");
        self.held.extend(acquired);
        self.staged.push(op);
        self.invalidate();
        Ok(())
    }

    /// The staged edit normalized against the committed graph.
    pub fn diff(&self) -> Vec<EditOp> {
        normalize(&self.staged, &WorkingSet::from_graph(&self.committed()))
    }

    /// Simulate the staged edit. The result is reused until the edit or the
    /// committed graph changes.
    pub async fn preview(&mut self) -> Result<Arc<PreviewGraph>, SimulationError> {
        let store_generation = self.inner.sync.store().generation();
        if let Some((generation, seen, result)) = &self.preview {
            if *generation == self.generation && *seen == store_generation {
                return result.clone();
            }
        }
        let manager = self.inner.sync.manager();
        let authoritative = pick_authoritative(manager, &manager.hosts());
        let result = self.simulate(authoritative.as_ref()).await;
        self.preview = Some((self.generation, store_generation, result.clone()));
        result
    }

    async fn simulate(&self, authoritative: Option<&HostId>) -> Result<Arc<PreviewGraph>, SimulationError> {
        let ops = self.diff();
        let committed = self.committed();
        self.inner
            .simulator
            .preview(&ops, &committed, authoritative)
            .await
            .map(Arc::new)
    }

    /// Apply the staged edit to `targets`.
    ///
    /// Ops run one after another in staged order; an op's hosts run
    /// concurrently and each host stops at its first failing command. After
    /// the first failed op every later op is skipped. Applied hosts are not
    /// rolled back: after a failure only the ops that did not reach every
    /// host stay staged, and retrying skips the hosts they already reached.
    /// A fresh poll follows every attempted commit.
    pub async fn commit(&mut self, targets: &[HostId]) -> Result<CommitResult, EditError> {
        let ops = self.diff();
        if ops.is_empty() {
            return Err(EditError::EmptyEdit);
        }
        if targets.is_empty() {
            return Err(EditError::NoTargets);
        }
        let manager = self.inner.sync.manager().clone();
        let known = manager.hosts();
        if let Some(unknown) = targets.iter().find(|t| !known.contains(t)) {
            return Err(EditError::UnknownHost(unknown.clone()));
        }
        let authoritative = pick_authoritative(&manager, targets).ok_or(EditError::NoTargets)?;

        let committed = self.committed();
        let mut ws = WorkingSet::from_graph(&committed);
        let mut planned: Vec<(EditOp, Vec<HostPlan>)> = Vec::with_capacity(ops.len());
        for op in &ops {
            let mut plans = translate::plan(op, &ws, &self.inner.table, &authoritative)?;
            if let Some((_, done)) = self.applied.iter().find(|(applied, _)| applied == op) {
                plans.retain(|p| !done.contains(&p.host));
            }
            if op.is_storage() {
                if let Some(missing) = plans.iter().find(|p| !targets.contains(&p.host)) {
                    return Err(EditError::HostNotTargeted {
                        op: op.to_string(),
                        host: missing.host.clone(),
                    });
                }
            }
            ws.apply(op);
            planned.push((op.clone(), plans));
        }

        let preview = self.simulate(Some(&authoritative)).await;
        self.preview = Some((
            self.generation,
            self.inner.sync.store().generation(),
            preview.clone(),
        ));
        let preview = preview?;
        info!(
            session = %self.id,
            ops = planned.len(),
            authoritative = %authoritative,
            mode = ?preview.mode,
            "committing edit"
        );

        let mut reports = Vec::with_capacity(planned.len());
        let mut failed = false;
        for (op, plans) in planned {
            let hosts: BTreeMap<HostId, HostOutcome> = if failed {
                plans
                    .iter()
                    .map(|p| (p.host.clone(), HostOutcome::Skipped(SkipReason::DueToEarlierFailure)))
                    .collect()
            } else {
                let timeout = self.inner.command_timeout;
                let outcomes = join_all(plans.iter().map(|p| run_plan(&manager, p, timeout))).await;
                plans.iter().map(|p| p.host.clone()).zip(outcomes).collect()
            };
            if hosts.values().any(|o| matches!(o, HostOutcome::Failed(_))) {
                failed = true;
            }
            reports.push(OpReport { op, hosts });
        }

        let resync = self.inner.sync.resync().await;
        let result = CommitResult { ops: reports, resync };

        if result.is_success() {
            info!(session = %self.id, generation = result.resync.generation, "edit committed");
            self.staged.clear();
            let held: Vec<EditTarget> = std::mem::take(&mut self.held).into_iter().collect();
            self.release(&held);
            self.applied.clear();
        } else {
            for (op, host, reason) in result.failures() {
                error!(session = %self.id, op = %op, host = %host, %reason, "commit failed");
            }
            self.keep_unfinished(&result.ops);
        }
        self.invalidate();
        Ok(result)
    }

    /// Restage only the ops some host has not applied yet, remember where
    /// each one already ran and release the locks nothing staged needs.
    fn keep_unfinished(&mut self, reports: &[OpReport]) {
        let mut staged = Vec::new();
        let mut applied = Vec::new();
        for report in reports {
            if report.hosts.values().all(HostOutcome::is_applied) {
                continue;
            }
            let mut done: BTreeSet<HostId> = self
                .applied
                .iter()
                .find(|(op, _)| op == &report.op)
                .map(|(_, hosts)| hosts.clone())
                .unwrap_or_default();
            done.extend(
                report
                    .hosts
                    .iter()
                    .filter(|(_, outcome)| outcome.is_applied())
                    .map(|(host, _)| host.clone()),
            );
            if !done.is_empty() {
                applied.push((report.op.clone(), done));
            }
            staged.push(report.op.clone());
        }
        debug!(session = %self.id, kept = staged.len(), "unfinished ops restaged");
        self.staged = staged;
        self.applied = applied;

        let needed: BTreeSet<EditTarget> = self.staged.iter().flat_map(EditOp::targets).collect();
        let unneeded: Vec<EditTarget> = self.held.difference(&needed).cloned().collect();
        for target in &unneeded {
            self.held.remove(target);
        }
        self.release(&unneeded);
    }

    /// Drop every staged op and release the locks.
    pub fn discard(&mut self) {
        if !self.staged.is_empty() {
            info!(session = %self.id, ops = self.staged.len(), "edit discarded");
        }
        self.staged.clear();
        self.applied.clear();
        let held: Vec<EditTarget> = std::mem::take(&mut self.held).into_iter().collect();
        self.release(&held);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.preview = None;
    }

    fn release(&self, targets: &[EditTarget]) {
        for target in targets {
            self.inner.locks.remove_if(target, |_, holder| *holder == self.id);
        }
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        for target in &self.held {
            self.inner.locks.remove_if(target, |_, holder| *holder == self.id);
        }
    }
}

async fn run_plan(manager: &SessionManager, plan: &HostPlan, default_timeout: Duration) -> HostOutcome {
    for command in &plan.commands {
        match manager
            .run(&plan.host, command, command.timeout_or(default_timeout))
            .await
        {
            Ok(output) if output.success() => {
                debug!(host = %plan.host, command = %command.name, duration_ms = output.duration_ms, "command applied");
            }
            Ok(output) => {
                warn!(host = %plan.host, command = %command.name, exit_code = output.exit_code, "command failed");
                return HostOutcome::Failed(format!("{}: {}", command.name, output.failure_summary()));
            }
            Err(e) => {
                warn!(host = %plan.host, command = %command.name, error = %e, "command not run to completion");
                return HostOutcome::Failed(format!("{}: {}", command.name, e));
            }
        }
    }
    HostOutcome::Applied
}
