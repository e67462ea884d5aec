//! Wholesale rebuild of the cluster graph from per-host snapshots.
//!
//! Nothing here is incremental: every poll produces a full set of snapshots
//! and a fresh graph. Conflicting reports are resolved by fixed rules:
//!
//! - configuration comes from the host with the highest configuration
//!   version, lowest host id on ties;
//! - a host's report about itself wins over other hosts' reports about it;
//! - a volume's connection is the least connected state either leg reports.

use crate::model::{Constraint, GraphWarning, Host, Leg, Resource, StorageVolume};
use crate::snapshot::{HostSnapshot, SnapshotData};
use hacore_parse::{
    CibVersion, ClusterConfig, ClusterStatus, LegDef, ParsedStatus, ResourceDef, ResourceKind,
    StorageStatus,
};
use hacore_types::{
    ConstraintId, DiskState, HostId, LegRole, ResourceId, VolumeConnection, VolumeId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Unified, immutable view of the cluster at one poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterGraph {
    pub(crate) hosts: BTreeMap<HostId, Host>,
    pub(crate) resources: BTreeMap<ResourceId, Resource>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) volumes: BTreeMap<VolumeId, StorageVolume>,
    pub(crate) config_source: Option<HostId>,
    pub(crate) config_version: Option<CibVersion>,
    pub(crate) warnings: Vec<GraphWarning>,
    pub(crate) snapshots: BTreeMap<HostId, HostSnapshot>,
}

fn parsed(snapshots: &BTreeMap<HostId, HostSnapshot>) -> impl Iterator<Item = (&HostId, &ParsedStatus)> + '_ {
    snapshots.iter().filter_map(|(id, s)| Some((id, s.status()?)))
}

fn cluster_statuses(
    snapshots: &BTreeMap<HostId, HostSnapshot>,
) -> impl Iterator<Item = (&HostId, &ClusterStatus)> + '_ {
    parsed(snapshots).filter_map(|(id, s)| Some((id, s.cluster_status.as_ref()?)))
}

fn own_cluster_status<'s>(snapshots: &'s BTreeMap<HostId, HostSnapshot>, host: &HostId) -> Option<&'s ClusterStatus> {
    snapshots.get(host)?.status()?.cluster_status.as_ref()
}

fn own_storage_status<'s>(snapshots: &'s BTreeMap<HostId, HostSnapshot>, host: &HostId) -> Option<&'s StorageStatus> {
    snapshots.get(host)?.status()?.storage_status.as_ref()
}

/// Highest configuration version wins; iteration is by host id, so the first
/// host keeps a tie.
fn select_config(snapshots: &BTreeMap<HostId, HostSnapshot>) -> Option<(&HostId, &ClusterConfig)> {
    let mut best: Option<(&HostId, &ClusterConfig)> = None;
    for (id, status) in parsed(snapshots) {
        let Some(config) = status.cluster_config.as_ref() else {
            continue;
        };
        if best.map_or(true, |(_, b)| config.version > b.version) {
            best = Some((id, config));
        }
    }
    best
}

impl ClusterGraph {
    /// Build a graph from one snapshot per registered host.
    pub fn rebuild_from(snapshots: BTreeMap<HostId, HostSnapshot>) -> Self {
        let mut graph = ClusterGraph::default();
        graph.collect_hosts(&snapshots);
        graph.collect_resources(&snapshots);
        graph.collect_volumes(&snapshots);
        graph.snapshots = snapshots;
        debug!(
            hosts = graph.hosts.len(),
            resources = graph.resources.len(),
            constraints = graph.constraints.len(),
            volumes = graph.volumes.len(),
            warnings = graph.warnings.len(),
            "cluster graph rebuilt"
        );
        graph
    }

    fn collect_hosts(&mut self, snapshots: &BTreeMap<HostId, HostSnapshot>) {
        for (id, snapshot) in snapshots {
            let mut host = Host::named(id.clone());
            host.registered = true;
            host.connection = snapshot.connection;
            host.snapshot_at = Some(snapshot.taken_at);
            match &snapshot.data {
                SnapshotData::Available { status, unparsed } => {
                    host.inventory = status.inventory.clone();
                    if !unparsed.is_empty() {
                        self.warnings.push(GraphWarning::UnparsedOutput {
                            host: id.clone(),
                            fragments: unparsed.len(),
                        });
                    }
                }
                SnapshotData::Unavailable { reason } => {
                    host.unavailable = Some(reason.clone());
                    self.warnings.push(GraphWarning::HostUnavailable {
                        host: id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            self.hosts.insert(id.clone(), host);
        }

        // Nodes the resource manager knows about but the engine does not poll.
        for (_, status) in parsed(snapshots) {
            let named = status
                .cluster_status
                .iter()
                .flat_map(|cs| cs.nodes.iter().map(|n| n.host.clone()))
                .chain(status.cluster_config.iter().flat_map(|cc| cc.nodes.iter().cloned()));
            for id in named {
                self.hosts
                    .entry(id.clone())
                    .or_insert_with(|| Host::named(id));
            }
        }

        for host in self.hosts.values_mut() {
            let node = own_cluster_status(snapshots, &host.id)
                .and_then(|cs| cs.node(&host.id))
                .or_else(|| cluster_statuses(snapshots).find_map(|(_, cs)| cs.node(&host.id)));
            if let Some(node) = node {
                host.online = Some(node.online);
                host.standby = node.standby;
                host.maintenance = node.maintenance;
                host.unclean = node.unclean;
                host.is_dc = node.is_dc;
            }
        }
    }

    fn collect_resources(&mut self, snapshots: &BTreeMap<HostId, HostSnapshot>) {
        if let Some((source, config)) = select_config(snapshots) {
            self.config_source = Some(source.clone());
            self.config_version = Some(config.version);
            for def in &config.resources {
                self.resources.insert(def.id.clone(), Resource::from_def(def.clone()));
            }
            self.constraints = config.constraints.clone();

            for (id, status) in parsed(snapshots) {
                if let Some(other) = status.cluster_config.as_ref() {
                    if other.version < config.version {
                        self.warnings.push(GraphWarning::ConfigDivergence {
                            host: id.clone(),
                            version: other.version.to_string(),
                            current: config.version.to_string(),
                        });
                    }
                }
            }
        }

        for (_, cs) in cluster_statuses(snapshots) {
            for id in &cs.known_resources {
                if self.resources.contains_key(id) {
                    continue;
                }
                let children: Vec<ResourceId> = cs
                    .membership
                    .iter()
                    .filter(|m| &m.parent == id)
                    .map(|m| m.child.clone())
                    .collect();
                let parent = cs.membership.iter().find(|m| &m.child == id).map(|m| m.parent.clone());
                let def = ResourceDef {
                    id: id.clone(),
                    kind: if children.is_empty() {
                        ResourceKind::Primitive
                    } else {
                        ResourceKind::Group
                    },
                    agent: None,
                    children,
                    parent,
                    promotable: false,
                    instance_attrs: BTreeMap::new(),
                    meta_attrs: BTreeMap::new(),
                };
                self.warnings.push(GraphWarning::UnconfiguredResource {
                    resource: id.clone(),
                });
                self.resources.insert(id.clone(), Resource::from_def(def));
            }
        }

        let host_ids: Vec<HostId> = self.hosts.keys().cloned().collect();
        for resource in self.resources.values_mut() {
            let id = resource.id().clone();
            for host in &host_ids {
                let find = |cs: &'_ ClusterStatus| {
                    cs.resources
                        .iter()
                        .find(|s| s.resource == id && &s.host == host)
                        .cloned()
                };
                let state = match own_cluster_status(snapshots, host) {
                    Some(own) => find(own),
                    None => cluster_statuses(snapshots).find_map(|(_, cs)| find(cs)),
                };
                if let Some(state) = state {
                    resource.status.insert(host.clone(), state.status);
                    if let Some(role) = state.role {
                        resource.roles.insert(host.clone(), role);
                    }
                }
            }

            let mut seen = BTreeSet::new();
            for (_, cs) in cluster_statuses(snapshots) {
                for failure in cs.failures.iter().filter(|f| f.resource == id) {
                    if seen.insert((failure.host.clone(), failure.task.clone())) {
                        resource.failures.push(failure.clone());
                    }
                }
            }
        }
    }

    fn collect_volumes(&mut self, snapshots: &BTreeMap<HostId, HostSnapshot>) {
        let mut defs = BTreeMap::new();
        for (_, status) in parsed(snapshots) {
            for def in status.storage_config.iter().flat_map(|sc| sc.volumes.iter()) {
                defs.entry(def.id.clone()).or_insert(def);
            }
        }

        for (_, status) in parsed(snapshots) {
            for volume in status.storage_status.iter().flat_map(|ss| ss.volumes.iter()) {
                if !defs.contains_key(&volume.id) {
                    let warning = GraphWarning::MalformedVolume {
                        volume: volume.id.clone(),
                        legs: 0,
                    };
                    if !self.warnings.contains(&warning) {
                        self.warnings.push(warning);
                    }
                }
            }
        }

        for (id, def) in defs {
            let [first, second] = def.legs.as_slice() else {
                self.warnings.push(GraphWarning::MalformedVolume {
                    volume: id.clone(),
                    legs: def.legs.len(),
                });
                continue;
            };
            let legs = [
                build_leg(first, &second.host, &id, snapshots),
                build_leg(second, &first.host, &id, snapshots),
            ];

            let mut connection: Option<VolumeConnection> = None;
            let mut sync_percent = None;
            for (leg, peer) in [(&legs[0], &legs[1]), (&legs[1], &legs[0])] {
                let Some(storage) = own_storage_status(snapshots, &leg.host) else {
                    continue;
                };
                let seen = match storage.volume(&id) {
                    Some(local) => match local.peers.iter().find(|p| p.host == peer.host) {
                        Some(p) => {
                            sync_percent = sync_percent.or(p.sync_percent);
                            p.connection
                        }
                        None => VolumeConnection::StandAlone,
                    },
                    // Configured but not brought up on this leg.
                    None => VolumeConnection::Disconnected,
                };
                connection = Some(match connection {
                    Some(c) if c.severity() >= seen.severity() => c,
                    _ => seen,
                });
            }

            self.volumes.insert(
                id.clone(),
                StorageVolume {
                    id,
                    legs,
                    connection: connection.unwrap_or(VolumeConnection::Disconnected),
                    sync_percent,
                    protocol: def.protocol.clone(),
                },
            );
        }
    }

    /// Host by id.
    pub fn host(&self, id: &HostId) -> Option<&Host> {
        self.hosts.get(id)
    }

    /// Hosts sorted by id.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Resource by id.
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources sorted by id.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Constraint by id.
    pub fn constraint(&self, id: &ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| &c.id == id)
    }

    /// Constraints in configuration order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Volume by id.
    pub fn volume(&self, id: &VolumeId) -> Option<&StorageVolume> {
        self.volumes.get(id)
    }

    /// Volumes sorted by id.
    pub fn volumes(&self) -> impl Iterator<Item = &StorageVolume> {
        self.volumes.values()
    }

    /// Host the configuration was taken from.
    pub fn config_source(&self) -> Option<&HostId> {
        self.config_source.as_ref()
    }

    /// Version of the configuration in use.
    pub fn config_version(&self) -> Option<CibVersion> {
        self.config_version
    }

    /// Problems found during the rebuild.
    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }

    /// Snapshots the graph was built from.
    pub fn snapshots(&self) -> &BTreeMap<HostId, HostSnapshot> {
        &self.snapshots
    }

    /// Hosts whose last poll failed.
    pub fn unavailable_hosts(&self) -> Vec<&Host> {
        self.hosts
            .values()
            .filter(|h| h.registered && h.unavailable.is_some())
            .collect()
    }
}

impl Resource {
    pub(crate) fn from_def(def: ResourceDef) -> Self {
        Self {
            def,
            status: BTreeMap::new(),
            roles: BTreeMap::new(),
            failures: Vec::new(),
        }
    }
}

/// Role and disk come from the leg host's own status, falling back to what
/// the peer reports about it.
fn build_leg(def: &LegDef, peer: &HostId, volume: &VolumeId, snapshots: &BTreeMap<HostId, HostSnapshot>) -> Leg {
    let own = own_storage_status(snapshots, &def.host)
        .and_then(|s| s.volume(volume))
        .map(|v| (v.role, v.disk));
    let (role, disk_state) = own
        .or_else(|| {
            own_storage_status(snapshots, peer)
                .and_then(|s| s.volume(volume))
                .and_then(|v| v.peers.iter().find(|p| p.host == def.host))
                .map(|p| (p.role, p.disk))
        })
        .unwrap_or((LegRole::Unknown, DiskState::DUnknown));
    Leg {
        host: def.host.clone(),
        device: def.device.clone(),
        disk: def.disk.clone(),
        meta_disk: def.meta_disk.clone(),
        address: def.address.clone(),
        port: def.port,
        node_id: def.node_id,
        role,
        disk_state,
    }
}
