//! Closed status vocabularies.
//!
//! Raw tool output is mapped onto these enums at the parser boundary; nothing
//! above the parsers matches on raw strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote session state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Authentication ladder in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Every configured credential was rejected.
    AuthFailed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AuthFailed => "auth-failed",
        };
        f.write_str(s)
    }
}

/// Status of a resource on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Not running.
    #[default]
    Stopped,
    /// Start in progress.
    Starting,
    /// Running.
    Started,
    /// Stop in progress.
    Stopping,
    /// Last start operation failed.
    FailedStart,
    /// Last stop operation failed; the resource may still be active.
    FailedStop,
    /// Active but not managed by the resource manager.
    Unmanaged,
}

impl ResourceStatus {
    /// True if the resource occupies the host in this state.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ResourceStatus::Starting
                | ResourceStatus::Started
                | ResourceStatus::Stopping
                | ResourceStatus::FailedStop
                | ResourceStatus::Unmanaged
        )
    }

    /// True for either failure state.
    pub fn is_failed(self) -> bool {
        matches!(self, ResourceStatus::FailedStart | ResourceStatus::FailedStop)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Role qualifier used by colocation constraints and multi-state clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceRole {
    /// Any running instance.
    Started,
    /// Promoted (master) instance.
    Promoted,
    /// Unpromoted (slave) instance.
    Unpromoted,
    /// Stopped instance.
    Stopped,
}

impl ResourceRole {
    /// Parse both the current and the legacy role spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "started" => Some(ResourceRole::Started),
            "promoted" | "master" => Some(ResourceRole::Promoted),
            "unpromoted" | "slave" => Some(ResourceRole::Unpromoted),
            "stopped" => Some(ResourceRole::Stopped),
            _ => None,
        }
    }

    /// Spelling used when writing configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceRole::Started => "Started",
            ResourceRole::Promoted => "Promoted",
            ResourceRole::Unpromoted => "Unpromoted",
            ResourceRole::Stopped => "Stopped",
        }
    }
}

/// Replication role of one storage leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LegRole {
    /// Writable copy.
    Primary,
    /// Read-only replica.
    Secondary,
    /// Not reported.
    #[default]
    Unknown,
}

impl LegRole {
    /// Parse a storage role keyword.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => LegRole::Primary,
            "secondary" => LegRole::Secondary,
            _ => LegRole::Unknown,
        }
    }

    /// Keyword used on the storage command line.
    pub fn as_str(self) -> &'static str {
        match self {
            LegRole::Primary => "primary",
            LegRole::Secondary => "secondary",
            LegRole::Unknown => "unknown",
        }
    }
}

/// Backing disk state of one storage leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiskState {
    /// Current data.
    UpToDate,
    /// Partially synchronized.
    Inconsistent,
    /// Consistent but stale.
    Outdated,
    /// No local backing device.
    Diskless,
    /// Consistent, freshness unknown.
    Consistent,
    /// Backing device being attached.
    Attaching,
    /// I/O error on the backing device.
    Failed,
    /// Handshake in progress.
    Negotiating,
    /// Not reported.
    #[default]
    DUnknown,
}

impl DiskState {
    /// Parse a disk state keyword.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "uptodate" => DiskState::UpToDate,
            "inconsistent" => DiskState::Inconsistent,
            "outdated" => DiskState::Outdated,
            "diskless" => DiskState::Diskless,
            "consistent" => DiskState::Consistent,
            "attaching" => DiskState::Attaching,
            "failed" => DiskState::Failed,
            "negotiating" => DiskState::Negotiating,
            _ => DiskState::DUnknown,
        }
    }
}

/// Replication link state between the two legs of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VolumeConnection {
    /// Replicating.
    Connected,
    /// Trying to reach the peer.
    Connecting,
    /// Link down.
    #[default]
    Disconnected,
    /// Administratively not connecting.
    StandAlone,
}

impl VolumeConnection {
    /// Map storage connection keywords, including the older per-state names.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "connected" | "established" | "syncsource" | "synctarget" | "pausedsyncs"
            | "pausedsynct" | "verifys" | "verifyt" | "wfbitmaps" | "wfbitmapt"
            | "wfsyncuuid" | "startingsyncs" | "startingsynct" => VolumeConnection::Connected,
            "connecting" | "wfconnection" | "wfreportparams" => VolumeConnection::Connecting,
            "standalone" => VolumeConnection::StandAlone,
            _ => VolumeConnection::Disconnected,
        }
    }

    /// Rank used to pick the least connected of two observations.
    pub fn severity(self) -> u8 {
        match self {
            VolumeConnection::Connected => 0,
            VolumeConnection::Connecting => 1,
            VolumeConnection::Disconnected => 2,
            VolumeConnection::StandAlone => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        assert!(ResourceStatus::Started.is_running());
        assert!(ResourceStatus::FailedStop.is_running());
        assert!(!ResourceStatus::FailedStart.is_running());
        assert!(!ResourceStatus::Stopped.is_running());
    }

    #[test]
    fn test_role_legacy_spellings() {
        assert_eq!(ResourceRole::parse("Master"), Some(ResourceRole::Promoted));
        assert_eq!(ResourceRole::parse("Slave"), Some(ResourceRole::Unpromoted));
        assert_eq!(ResourceRole::parse("bogus"), None);
    }

    #[test]
    fn test_leg_role_parse() {
        assert_eq!(LegRole::parse("Primary"), LegRole::Primary);
        assert_eq!(LegRole::parse("secondary"), LegRole::Secondary);
        assert_eq!(LegRole::parse("?"), LegRole::Unknown);
    }

    #[test]
    fn test_disk_state_parse() {
        assert_eq!(DiskState::parse("UpToDate"), DiskState::UpToDate);
        assert_eq!(DiskState::parse("Diskless"), DiskState::Diskless);
        assert_eq!(DiskState::parse("weird"), DiskState::DUnknown);
    }

    #[test]
    fn test_volume_connection_parse() {
        assert_eq!(VolumeConnection::parse("Established"), VolumeConnection::Connected);
        assert_eq!(VolumeConnection::parse("SyncSource"), VolumeConnection::Connected);
        assert_eq!(VolumeConnection::parse("WFConnection"), VolumeConnection::Connecting);
        assert_eq!(VolumeConnection::parse("StandAlone"), VolumeConnection::StandAlone);
        assert_eq!(VolumeConnection::parse("Unconnected"), VolumeConnection::Disconnected);
    }

    #[test]
    fn test_severity_order() {
        assert!(VolumeConnection::StandAlone.severity() > VolumeConnection::Disconnected.severity());
        assert!(VolumeConnection::Disconnected.severity() > VolumeConnection::Connected.severity());
    }
}
