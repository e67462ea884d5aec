//! Dispatch of raw per-host outputs to the parsers, keyed by logical command
//! name.

use crate::cluster_config::{parse_cluster_config, ClusterConfig};
use crate::cluster_status::{parse_cluster_status, ClusterStatus};
use crate::inventory::{parse_inventory, Inventory};
use crate::storage_config::{parse_storage_config, StorageConfig};
use crate::storage_status::{parse_storage_status, StorageStatus};
use crate::{Fragment, Parsed, Source};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical command names understood by [`parse_host_status`].
pub mod names {
    /// Resource-manager status document.
    pub const CLUSTER_STATUS: &str = "cluster.status";
    /// Resource-manager configuration document.
    pub const CLUSTER_CONFIG: &str = "cluster.config";
    /// Storage status text.
    pub const STORAGE_STATUS: &str = "storage.status";
    /// Storage configuration text.
    pub const STORAGE_CONFIG: &str = "storage.config";
    /// Network addresses.
    pub const HOST_NET: &str = "host.net";
    /// Block devices.
    pub const HOST_BLOCK: &str = "host.block";

    /// The default poll command set.
    pub const DEFAULT_SET: &[&str] = &[
        CLUSTER_STATUS,
        CLUSTER_CONFIG,
        STORAGE_STATUS,
        STORAGE_CONFIG,
        HOST_NET,
        HOST_BLOCK,
    ];
}

/// Everything parsed from one host's outputs. A document is `None` when its
/// command was not part of the poll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedStatus {
    /// Resource-manager status.
    pub cluster_status: Option<ClusterStatus>,
    /// Resource-manager configuration.
    pub cluster_config: Option<ClusterConfig>,
    /// Storage status.
    pub storage_status: Option<StorageStatus>,
    /// Storage configuration.
    pub storage_config: Option<StorageConfig>,
    /// Network and block inventory.
    pub inventory: Option<Inventory>,
}

fn absorb<T>(parsed: Parsed<T>, unparsed: &mut Vec<Fragment>) -> Option<T> {
    unparsed.extend(parsed.unparsed);
    Some(parsed.value)
}

/// Parse every output of one host. `outputs` maps logical command names to
/// standard output; unknown names become fragments.
pub fn parse_host_status(outputs: &BTreeMap<String, String>) -> Parsed<ParsedStatus> {
    let mut status = ParsedStatus::default();
    let mut unparsed = Vec::new();

    for (name, text) in outputs {
        match name.as_str() {
            names::CLUSTER_STATUS => {
                status.cluster_status = absorb(parse_cluster_status(text), &mut unparsed)
            }
            names::CLUSTER_CONFIG => {
                status.cluster_config = absorb(parse_cluster_config(text), &mut unparsed)
            }
            names::STORAGE_STATUS => {
                status.storage_status = absorb(parse_storage_status(text), &mut unparsed)
            }
            names::STORAGE_CONFIG => {
                status.storage_config = absorb(parse_storage_config(text), &mut unparsed)
            }
            names::HOST_NET | names::HOST_BLOCK => {}
            other => unparsed.push(Fragment::new(
                Source::Dispatch,
                other,
                "no parser for this command",
            )),
        }
    }

    let net = outputs.get(names::HOST_NET);
    let block = outputs.get(names::HOST_BLOCK);
    if net.is_some() || block.is_some() {
        let parsed = parse_inventory(
            net.map(String::as_str).unwrap_or_default(),
            block.map(String::as_str).unwrap_or_default(),
        );
        status.inventory = absorb(parsed, &mut unparsed);
    }

    Parsed {
        value: status,
        unparsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_name() {
        let mut outputs = BTreeMap::new();
        outputs.insert(names::STORAGE_STATUS.to_string(), "r0 role:Primary\n".to_string());
        outputs.insert(names::HOST_NET.to_string(), String::new());
        let parsed = parse_host_status(&outputs);
        assert!(parsed.is_clean());
        assert_eq!(parsed.value.storage_status.unwrap().volumes.len(), 1);
        assert!(parsed.value.inventory.is_some());
        assert!(parsed.value.cluster_status.is_none());
    }

    #[test]
    fn test_unknown_name_is_fragment() {
        let mut outputs = BTreeMap::new();
        outputs.insert("vm.list".to_string(), "x".to_string());
        let parsed = parse_host_status(&outputs);
        assert_eq!(parsed.unparsed.len(), 1);
        assert_eq!(parsed.unparsed[0].source, Source::Dispatch);
    }

    #[test]
    fn test_fragments_are_collected() {
        let mut outputs = BTreeMap::new();
        outputs.insert(names::CLUSTER_STATUS.to_string(), "not xml".to_string());
        let parsed = parse_host_status(&outputs);
        assert_eq!(parsed.value.cluster_status, Some(ClusterStatus::default()));
        assert_eq!(parsed.unparsed[0].source, Source::ClusterStatus);
    }
}
