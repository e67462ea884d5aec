//! Shared builders for graph tests: two hosts, `alpha` and `beta`.

#![allow(dead_code)]

use chrono::Utc;
use hacore_graph::{ClusterGraph, HostSnapshot};
use hacore_parse::{names, parse_host_status};
use hacore_types::{ConnectionState, HostId};
use std::collections::BTreeMap;

pub const DRBD_DUMP: &str = "\
resource web {
    on alpha { node-id 0; volume 0 { device minor 0; disk /dev/vg0/web; meta-disk internal; } address ipv4 10.0.0.1:7789; }
    on beta { node-id 1; volume 0 { device minor 0; disk /dev/vg0/web; meta-disk internal; } address ipv4 10.0.0.2:7789; }
}
";

pub fn cib(epoch: u64, resources: &str, constraints: &str) -> String {
    format!(
        r#"<cib admin_epoch="0" epoch="{epoch}" num_updates="0">
  <configuration>
    <nodes><node id="1" uname="alpha"/><node id="2" uname="beta"/></nodes>
    <resources>{resources}</resources>
    <constraints>{constraints}</constraints>
  </configuration>
</cib>"#
    )
}

pub fn crm_mon(resources: &str) -> String {
    format!(
        r#"<crm_mon version="2.0.5">
  <summary><current_dc present="true" name="alpha"/></summary>
  <nodes>
    <node name="alpha" online="true" standby="false" is_dc="true"/>
    <node name="beta" online="true" standby="false" is_dc="false"/>
  </nodes>
  <resources>{resources}</resources>
</crm_mon>"#
    )
}

pub fn drbd_status(role: &str, peer: &str, connection: &str, peer_role: &str) -> String {
    format!(
        "web node-id:0 role:{role} suspended:no\n  volume:0 minor:0 disk:UpToDate\n  {peer} connection:{connection} role:{peer_role}\n    volume:0 peer-disk:UpToDate\n"
    )
}

/// Snapshot of a host from raw command outputs keyed by logical name.
pub fn host_snapshot(outputs: &[(&str, String)]) -> HostSnapshot {
    let map: BTreeMap<String, String> = outputs
        .iter()
        .map(|(name, text)| (name.to_string(), text.clone()))
        .collect();
    HostSnapshot::available(parse_host_status(&map), ConnectionState::Connected, Utc::now())
}

/// Both hosts report the same configuration and status documents; storage
/// status differs per host.
pub fn two_node_graph(cib_xml: &str, mon_xml: &str, alpha_drbd: &str, beta_drbd: &str) -> ClusterGraph {
    let mut snapshots = BTreeMap::new();
    for (host, drbd) in [("alpha", alpha_drbd), ("beta", beta_drbd)] {
        snapshots.insert(
            HostId::new(host),
            host_snapshot(&[
                (names::CLUSTER_CONFIG, cib_xml.to_string()),
                (names::CLUSTER_STATUS, mon_xml.to_string()),
                (names::STORAGE_CONFIG, DRBD_DUMP.to_string()),
                (names::STORAGE_STATUS, drbd.to_string()),
            ]),
        );
    }
    ClusterGraph::rebuild_from(snapshots)
}
