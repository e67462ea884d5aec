//! Graph rebuilds over realistic two-node output.

mod common;

use common::{cib, crm_mon, drbd_status, two_node_graph};
use hacore_graph::{GraphStore, GraphWarning};
use hacore_types::{HostId, LegRole, ResourceId, ResourceStatus, Score, VolumeConnection, VolumeId};
use std::sync::Arc;

const RESOURCES: &str = r#"
<master id="ms_drbd_web"><primitive id="drbd_web" class="ocf" provider="linbit" type="drbd"/></master>
<group id="g_web">
  <primitive id="fs_web" class="ocf" provider="heartbeat" type="Filesystem"/>
  <primitive id="vip" class="ocf" provider="heartbeat" type="IPaddr2"/>
</group>"#;

const CONSTRAINTS: &str = r#"
<rsc_colocation id="web_on_drbd" rsc="g_web" with-rsc="ms_drbd_web" with-rsc-role="Master" score="INFINITY"/>
<rsc_order id="drbd_before_web" first="ms_drbd_web" first-action="promote" then="g_web" then-action="start"/>
<rsc_location id="prefer_alpha" rsc="g_web" node="alpha" score="50"/>
<rsc_location id="never_beta" rsc="g_web" node="beta" score="-INFINITY"/>"#;

const RUNNING: &str = r#"
<clone id="ms_drbd_web" multi_state="true">
  <resource id="drbd_web:0" role="Master" active="true" managed="true" failed="false"><node name="alpha"/></resource>
  <resource id="drbd_web:1" role="Slave" active="true" managed="true" failed="false"><node name="beta"/></resource>
</clone>
<group id="g_web">
  <resource id="fs_web" role="Started" active="true" managed="true" failed="false"><node name="alpha"/></resource>
  <resource id="vip" role="Started" active="true" managed="true" failed="false"><node name="alpha"/></resource>
</group>"#;

fn healthy() -> hacore_graph::ClusterGraph {
    two_node_graph(
        &cib(9, RESOURCES, CONSTRAINTS),
        &crm_mon(RUNNING),
        &drbd_status("Primary", "beta", "Connected", "Secondary"),
        &drbd_status("Secondary", "alpha", "Connected", "Primary"),
    )
}

#[test]
fn test_healthy_cluster() {
    let graph = healthy();
    assert!(graph.warnings().is_empty(), "{:?}", graph.warnings());
    assert_eq!(graph.hosts().count(), 2);
    assert_eq!(graph.effective_status(&ResourceId::new("g_web")), ResourceStatus::Started);
    assert_eq!(graph.hosts_running(&ResourceId::new("ms_drbd_web")), vec![HostId::new("alpha"), HostId::new("beta")]);
    assert_eq!(graph.hosts_running(&ResourceId::new("vip")), vec![HostId::new("alpha")]);

    let web = graph.volume(&VolumeId::new("web")).unwrap();
    assert_eq!(web.connection, VolumeConnection::Connected);
    assert_eq!(web.leg(&HostId::new("alpha")).unwrap().role, LegRole::Primary);
    assert_eq!(web.leg(&HostId::new("beta")).unwrap().device, "/dev/drbd0");
    assert!(graph.split_brain_volumes().is_empty());
}

#[test]
fn test_dependency_queries() {
    let graph = healthy();
    let deps = graph.dependents_of(&ResourceId::new("ms_drbd_web"));
    assert!(deps.contains(&ResourceId::new("vip")));
    assert!(deps.contains(&ResourceId::new("fs_web")));
    assert!(graph.ordered_after(&ResourceId::new("g_web"), &ResourceId::new("ms_drbd_web")));
    assert!(graph.ordered_after(&ResourceId::new("vip"), &ResourceId::new("fs_web")));
    assert!(!graph.ordered_after(&ResourceId::new("fs_web"), &ResourceId::new("vip")));
    assert!(graph.colocated_with(&ResourceId::new("vip")).contains(&ResourceId::new("ms_drbd_web")));
}

#[test]
fn test_placement_queries() {
    let graph = healthy();
    assert_eq!(graph.location_score(&ResourceId::new("g_web"), &HostId::new("alpha")), Some(Score::new(50)));
    assert_eq!(graph.location_score(&ResourceId::new("g_web"), &HostId::new("beta")), Some(Score::NEG_INFINITY));
    assert!(graph.can_run_on(&ResourceId::new("vip"), &HostId::new("alpha")));
    assert!(!graph.can_run_on(&ResourceId::new("vip"), &HostId::new("beta")));
}

#[test]
fn test_split_brain_detected() {
    let graph = two_node_graph(
        &cib(9, RESOURCES, CONSTRAINTS),
        &crm_mon(RUNNING),
        &drbd_status("Primary", "beta", "Connecting", "Unknown"),
        &drbd_status("Primary", "alpha", "Disconnected", "Unknown"),
    );
    let split = graph.split_brain_volumes();
    assert_eq!(split.len(), 1);
    assert_eq!(graph.peers_of(&split[0].id), Some([HostId::new("alpha"), HostId::new("beta")]));
}

#[test]
fn test_standalone_is_not_split_brain() {
    let graph = two_node_graph(
        &cib(9, RESOURCES, CONSTRAINTS),
        &crm_mon(RUNNING),
        &drbd_status("Primary", "beta", "StandAlone", "Unknown"),
        &drbd_status("Primary", "alpha", "StandAlone", "Unknown"),
    );
    assert_eq!(graph.volume(&VolumeId::new("web")).unwrap().connection, VolumeConnection::StandAlone);
    assert!(graph.split_brain_volumes().is_empty());
}

#[test]
fn test_parse_noise_becomes_warning() {
    let graph = two_node_graph(
        &cib(9, RESOURCES, CONSTRAINTS),
        "this is not xml",
        &drbd_status("Primary", "beta", "Connected", "Secondary"),
        &drbd_status("Secondary", "alpha", "Connected", "Primary"),
    );
    assert!(graph
        .warnings()
        .iter()
        .any(|w| matches!(w, GraphWarning::UnparsedOutput { .. })));
    assert_eq!(graph.effective_status(&ResourceId::new("g_web")), ResourceStatus::Stopped);
}

#[test]
fn test_graph_serializes() {
    let graph = healthy();
    let json = serde_json::to_string(&graph).unwrap();
    let back: hacore_graph::ClusterGraph = serde_json::from_str(&json).unwrap();
    assert_eq!(back.volumes().count(), 1);
}

#[test]
fn test_concurrent_readers_never_see_mixed_graph() {
    // Every graph published has all hosts reporting the same epoch, and
    // exactly `epoch` resources. A reader seeing anything else saw a mix.
    let store = Arc::new(GraphStore::new());
    let graph_for = |epoch: u64| {
        let resources: String = (0..epoch)
            .map(|i| format!(r#"<primitive id="r{i}" class="systemd" type="svc{i}"/>"#))
            .collect();
        two_node_graph(&cib(epoch, &resources, ""), &crm_mon(""), "", "")
    };
    let graphs: Vec<_> = (1..=20).map(graph_for).collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let (generation, graph) = store.load_with_generation();
                    if generation == 0 {
                        continue;
                    }
                    let version = graph.config_version().unwrap();
                    assert_eq!(graph.resources().count() as u64, version.epoch);
                    assert_eq!(version.epoch, generation);
                }
            })
        })
        .collect();
    for graph in graphs {
        store.publish(graph);
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.generation(), 20);
}
