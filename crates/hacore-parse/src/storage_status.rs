//! Replicated-storage status (`drbdsetup status --verbose --statistics`).
//!
//! The format is indentation-structured `key:value` text:
//!
//! ```text
//! r0 node-id:0 role:Primary suspended:no
//!   volume:0 minor:0 disk:UpToDate
//!   node2 node-id:1 connection:Connected role:Secondary
//!     volume:0 replication:SyncSource peer-disk:Inconsistent done:45.30
//! ```

use crate::{Fragment, Parsed, Source};
use hacore_types::{DiskState, HostId, LegRole, VolumeConnection, VolumeId};
use serde::{Deserialize, Serialize};

/// What this host reports about one peer of a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Peer node.
    pub host: HostId,
    /// Connection state to the peer.
    pub connection: VolumeConnection,
    /// Peer role as seen from here.
    pub role: LegRole,
    /// Peer disk state as seen from here.
    pub disk: DiskState,
    /// Replication state (`Established`, `SyncSource`, ...).
    pub replication: Option<String>,
    /// Resync progress in percent while a resync runs.
    pub sync_percent: Option<f64>,
}

/// Local view of one volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeStatus {
    /// Volume (DRBD resource) name.
    pub id: VolumeId,
    /// Local role.
    pub role: LegRole,
    /// Local disk state.
    pub disk: DiskState,
    /// Peers in output order.
    pub peers: Vec<PeerStatus>,
}

impl VolumeStatus {
    /// Resync progress reported towards any peer.
    pub fn sync_percent(&self) -> Option<f64> {
        self.peers.iter().find_map(|p| p.sync_percent)
    }
}

/// Parsed storage status of one host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageStatus {
    /// Volumes in output order.
    pub volumes: Vec<VolumeStatus>,
}

impl StorageStatus {
    /// Volume by id.
    pub fn volume(&self, id: &VolumeId) -> Option<&VolumeStatus> {
        self.volumes.iter().find(|v| &v.id == id)
    }
}

fn pairs<'a>(tokens: &'a [&'a str]) -> impl Iterator<Item = (String, String)> + 'a {
    tokens
        .iter()
        .filter_map(|t| t.split_once(':'))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
}

fn percent(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0))
}

/// Parse storage status text.
pub fn parse_storage_status(input: &str) -> Parsed<StorageStatus> {
    let mut out = StorageStatus::default();
    let mut unparsed = Vec::new();
    // Indentation of the peer line currently open, if any.
    let mut peer_indent: Option<usize> = None;

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let first = tokens[0];

        if indent == 0 {
            peer_indent = None;
            let has_pairs = tokens[1..].iter().any(|t| t.contains(':'));
            if first.contains(':') || !has_pairs {
                unparsed.push(Fragment::new(Source::StorageStatus, line, "not a volume header"));
                continue;
            }
            let mut volume = VolumeStatus {
                id: VolumeId::new(first),
                role: LegRole::Unknown,
                disk: DiskState::DUnknown,
                peers: Vec::new(),
            };
            for (key, value) in pairs(&tokens[1..]) {
                if key == "role" {
                    volume.role = LegRole::parse(&value);
                }
            }
            out.volumes.push(volume);
            continue;
        }

        let Some(volume) = out.volumes.last_mut() else {
            unparsed.push(Fragment::new(Source::StorageStatus, line, "indented line before any volume"));
            continue;
        };

        if !first.contains(':') {
            // Peer line; connection is omitted while connected.
            let mut peer = PeerStatus {
                host: HostId::new(first),
                connection: VolumeConnection::Connected,
                role: LegRole::Unknown,
                disk: DiskState::DUnknown,
                replication: None,
                sync_percent: None,
            };
            for (key, value) in pairs(&tokens[1..]) {
                match key.as_str() {
                    "connection" => peer.connection = VolumeConnection::parse(&value),
                    "role" => peer.role = LegRole::parse(&value),
                    _ => {}
                }
            }
            volume.peers.push(peer);
            peer_indent = Some(indent);
            continue;
        }

        let in_peer = matches!(peer_indent, Some(p) if indent > p);
        if !in_peer {
            peer_indent = None;
        }
        for (key, value) in pairs(&tokens) {
            match (in_peer, key.as_str()) {
                (false, "disk") if volume.disk == DiskState::DUnknown => {
                    volume.disk = DiskState::parse(&value)
                }
                (true, _) => {
                    let Some(peer) = volume.peers.last_mut() else {
                        continue;
                    };
                    match key.as_str() {
                        "peer-disk" if peer.disk == DiskState::DUnknown => {
                            peer.disk = DiskState::parse(&value)
                        }
                        "replication" => peer.replication = Some(value),
                        "done" => peer.sync_percent = percent(&value),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    Parsed {
        value: out,
        unparsed,
    }
}
