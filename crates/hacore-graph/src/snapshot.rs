//! Per-host input to a graph rebuild.

use chrono::{DateTime, Utc};
use hacore_parse::{Fragment, Parsed, ParsedStatus};
use hacore_types::ConnectionState;
use serde::{Deserialize, Serialize};

/// What one poll learned about one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotData {
    /// Outputs were collected and parsed.
    Available {
        /// Parsed documents.
        status: ParsedStatus,
        /// Output the parsers did not understand.
        unparsed: Vec<Fragment>,
    },
    /// The host could not be polled.
    Unavailable {
        /// Connect, transport or timeout failure.
        reason: String,
    },
}

/// One host's full replacement snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// Session state when the poll finished.
    pub connection: ConnectionState,
    /// Poll completion time.
    pub taken_at: DateTime<Utc>,
    /// Poll result.
    pub data: SnapshotData,
}

impl HostSnapshot {
    /// Snapshot from parsed outputs.
    pub fn available(parsed: Parsed<ParsedStatus>, connection: ConnectionState, taken_at: DateTime<Utc>) -> Self {
        Self {
            connection,
            taken_at,
            data: SnapshotData::Available {
                status: parsed.value,
                unparsed: parsed.unparsed,
            },
        }
    }

    /// Snapshot of a host that could not be polled.
    pub fn unavailable(reason: impl Into<String>, connection: ConnectionState, taken_at: DateTime<Utc>) -> Self {
        Self {
            connection,
            taken_at,
            data: SnapshotData::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// Parsed documents, if the poll succeeded.
    pub fn status(&self) -> Option<&ParsedStatus> {
        match &self.data {
            SnapshotData::Available { status, .. } => Some(status),
            SnapshotData::Unavailable { .. } => None,
        }
    }

    /// Mutable parsed documents, for building what-if snapshots.
    pub fn status_mut(&mut self) -> Option<&mut ParsedStatus> {
        match &mut self.data {
            SnapshotData::Available { status, .. } => Some(status),
            SnapshotData::Unavailable { .. } => None,
        }
    }

    /// True if the poll succeeded.
    pub fn is_available(&self) -> bool {
        matches!(self.data, SnapshotData::Available { .. })
    }
}
