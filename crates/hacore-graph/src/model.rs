//! Graph entities. Entities reference each other only by id so the graph can
//! be thrown away and rebuilt on every poll.

use hacore_parse::{ConstraintDef, Inventory, ResourceDef, ResourceFailure, ResourceKind};
use hacore_types::{
    ConnectionState, DiskState, HostId, LegRole, ResourceId, ResourceRole, ResourceStatus,
    VolumeConnection, VolumeId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Placement/ordering rule; the parsed definition is the model.
pub type Constraint = ConstraintDef;

/// A cluster node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Normalized host name.
    pub id: HostId,
    /// Registered with the engine (has a session), as opposed to only being
    /// named by a resource-manager document.
    pub registered: bool,
    /// Remote session state at snapshot time.
    pub connection: ConnectionState,
    /// When the host's last snapshot was taken.
    pub snapshot_at: Option<DateTime<Utc>>,
    /// Why the last poll produced no data.
    pub unavailable: Option<String>,
    /// Resource-manager membership, if any status mentions the host.
    pub online: Option<bool>,
    /// In standby.
    pub standby: bool,
    /// In maintenance.
    pub maintenance: bool,
    /// Lost uncleanly.
    pub unclean: bool,
    /// Designated coordinator.
    pub is_dc: bool,
    /// Network and block inventory.
    pub inventory: Option<Inventory>,
}

impl Host {
    pub(crate) fn named(id: HostId) -> Self {
        Self {
            id,
            registered: false,
            connection: ConnectionState::Disconnected,
            snapshot_at: None,
            unavailable: None,
            online: None,
            standby: false,
            maintenance: false,
            unclean: false,
            is_dc: false,
            inventory: None,
        }
    }

    /// True if the last poll returned data.
    pub fn is_available(&self) -> bool {
        self.registered && self.unavailable.is_none()
    }

    /// True if the resource manager may place resources here.
    pub fn accepts_resources(&self) -> bool {
        self.online != Some(false) && !self.standby && !self.unclean
    }
}

/// A managed resource with its per-host status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Configured definition.
    pub def: ResourceDef,
    /// Status per host; hosts missing here are `Stopped`.
    pub status: BTreeMap<HostId, ResourceStatus>,
    /// Reported role per host.
    pub roles: BTreeMap<HostId, ResourceRole>,
    /// Failed operations, one per host and task.
    pub failures: Vec<ResourceFailure>,
}

impl Resource {
    /// Resource id.
    pub fn id(&self) -> &ResourceId {
        &self.def.id
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.def.kind
    }

    /// Status on `host`.
    pub fn status_on(&self, host: &HostId) -> ResourceStatus {
        self.status.get(host).copied().unwrap_or_default()
    }
}

/// One side of a replicated volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    /// Host holding this leg.
    pub host: HostId,
    /// Replicated device path.
    pub device: String,
    /// Backing disk.
    pub disk: String,
    /// Meta-data location.
    pub meta_disk: String,
    /// Replication address.
    pub address: String,
    /// Replication port.
    pub port: Option<u16>,
    /// Node id for multi-peer configurations.
    #[serde(default)]
    pub node_id: Option<u32>,
    /// Current role.
    pub role: LegRole,
    /// Current disk state.
    pub disk_state: DiskState,
}

/// A two-legged replicated volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageVolume {
    /// Volume id.
    pub id: VolumeId,
    /// Exactly two legs, in configuration order.
    pub legs: [Leg; 2],
    /// Least connected state reported by either leg.
    pub connection: VolumeConnection,
    /// Resync progress while a resync runs.
    pub sync_percent: Option<f64>,
    /// Replication protocol.
    pub protocol: Option<String>,
}

impl StorageVolume {
    /// Leg on `host`.
    pub fn leg(&self, host: &HostId) -> Option<&Leg> {
        self.legs.iter().find(|l| &l.host == host)
    }

    /// The other leg relative to `host`.
    pub fn peer_leg(&self, host: &HostId) -> Option<&Leg> {
        match (&self.legs[0].host == host, &self.legs[1].host == host) {
            (true, _) => Some(&self.legs[1]),
            (_, true) => Some(&self.legs[0]),
            _ => None,
        }
    }

    /// Both legs primary while the link is down.
    pub fn is_split_brain(&self) -> bool {
        self.connection == VolumeConnection::Disconnected
            && self.legs.iter().all(|l| l.role == LegRole::Primary)
    }
}

/// Inconsistencies found while rebuilding; the graph is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphWarning {
    /// A polled host returned no data.
    HostUnavailable {
        /// Host.
        host: HostId,
        /// Poll failure.
        reason: String,
    },
    /// Output the parsers could not map onto the model.
    UnparsedOutput {
        /// Host whose output it was.
        host: HostId,
        /// Number of fragments.
        fragments: usize,
    },
    /// A volume configured with other than two legs.
    MalformedVolume {
        /// Volume.
        volume: VolumeId,
        /// Legs found.
        legs: usize,
    },
    /// A resource reported by status but absent from the configuration.
    UnconfiguredResource {
        /// Resource.
        resource: ResourceId,
    },
    /// Hosts disagree on the configuration version.
    ConfigDivergence {
        /// Host whose configuration is older.
        host: HostId,
        /// Its version.
        version: String,
        /// Version in use.
        current: String,
    },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::HostUnavailable { host, reason } => {
                write!(f, "host {} unavailable: {}", host, reason)
            }
            GraphWarning::UnparsedOutput { host, fragments } => {
                write!(f, "host {}: {} unparsed output fragments", host, fragments)
            }
            GraphWarning::MalformedVolume { volume, legs } => {
                write!(f, "volume {} has {} legs, expected 2", volume, legs)
            }
            GraphWarning::UnconfiguredResource { resource } => {
                write!(f, "resource {} is reported but not configured", resource)
            }
            GraphWarning::ConfigDivergence {
                host,
                version,
                current,
            } => write!(f, "host {} has configuration {} behind {}", host, version, current),
        }
    }
}
