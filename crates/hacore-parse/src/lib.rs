#![warn(missing_docs)]

//! HACore parsers.
//!
//! Pure functions from raw tool output to typed documents. Nothing here fails:
//! whatever cannot be interpreted is returned as a [`Fragment`] next to the
//! value, and a document that cannot be read at all yields an empty value plus
//! one fragment.

pub mod cluster_config;
pub mod cluster_status;
pub mod host_status;
pub mod inventory;
pub mod storage_config;
pub mod storage_status;
mod xml;

pub use cluster_config::{
    parse_cluster_config, Action, CibVersion, ClusterConfig, ConstraintDef, ConstraintKind, Endpoints,
    ResourceDef, ResourceKind,
};
pub use cluster_status::{
    parse_cluster_status, ClusterStatus, Membership, NodeStatus, ResourceFailure, ResourceState,
};
pub use host_status::{names, parse_host_status, ParsedStatus};
pub use inventory::{parse_inventory, AddressFamily, BlockDevice, Inventory, NetInterface};
pub use storage_config::{parse_storage_config, LegDef, StorageConfig, VolumeDef};
pub use storage_status::{parse_storage_status, PeerStatus, StorageStatus, VolumeStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest fragment text kept verbatim.
const MAX_FRAGMENT_TEXT: usize = 512;

/// Which parser produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Resource-manager status document.
    ClusterStatus,
    /// Resource-manager configuration document.
    ClusterConfig,
    /// Replicated-storage status text.
    StorageStatus,
    /// Replicated-storage configuration text.
    StorageConfig,
    /// Network and block device inventory.
    Inventory,
    /// Output with no parser registered.
    Dispatch,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::ClusterStatus => "cluster-status",
            Source::ClusterConfig => "cluster-config",
            Source::StorageStatus => "storage-status",
            Source::StorageConfig => "storage-config",
            Source::Inventory => "inventory",
            Source::Dispatch => "dispatch",
        };
        f.write_str(s)
    }
}

/// A piece of input the parser could not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Producing parser.
    pub source: Source,
    /// Offending input, truncated.
    pub text: String,
    /// Why it was not interpreted.
    pub reason: String,
}

impl Fragment {
    /// Build a fragment, truncating long text on a character boundary.
    pub fn new(source: Source, text: &str, reason: impl Into<String>) -> Self {
        let text = match text.char_indices().nth(MAX_FRAGMENT_TEXT) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        };
        Self {
            source,
            text,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.source, self.reason, self.text)
    }
}

/// A parsed value plus everything that was skipped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Parsed<T> {
    /// Interpreted value.
    pub value: T,
    /// Input that was not interpreted.
    pub unparsed: Vec<Fragment>,
}

impl<T> Parsed<T> {
    /// A clean result.
    pub fn new(value: T) -> Self {
        Self {
            value,
            unparsed: Vec::new(),
        }
    }

    /// True if nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.unparsed.is_empty()
    }

    /// Transform the value, keeping the fragments.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            value: f(self.value),
            unparsed: self.unparsed,
        }
    }
}

impl<T: Default> Parsed<T> {
    /// Empty value with a single fragment describing why.
    pub fn rejected(source: Source, text: &str, reason: impl Into<String>) -> Self {
        Self {
            value: T::default(),
            unparsed: vec![Fragment::new(source, text, reason)],
        }
    }
}
