//! A scripted two-node cluster, `a` and `b`, sharing volume `r0`.

#![allow(dead_code)]

use hacore_engine::simulate::STATUS_MARKER;
use hacore_engine::{ClusterSync, EditEngine, EngineConfig, HostEntry};
use chrono::Utc;
use hacore_graph::{ClusterGraph, HostSnapshot};
use hacore_parse::{names, parse_host_status};
use hacore_session::testing::{ScriptedReply, ScriptedTransport};
use hacore_types::{ConnectionState, ConstraintId, HostId, ResourceId};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DRBD_DUMP: &str = "\
resource r0 {
    on a { node-id 0; volume 0 { device minor 0; disk /dev/sdb; meta-disk internal; } address ipv4 10.0.0.1:7789; }
    on b { node-id 1; volume 0 { device minor 0; disk /dev/sdb; meta-disk internal; } address ipv4 10.0.0.2:7789; }
}
";

pub const RESOURCES: &str = r#"<primitive id="res1" class="ocf" provider="heartbeat" type="IPaddr2"><instance_attributes id="res1-ia"><nvpair id="res1-ia-ip" name="ip" value="10.0.0.50"/></instance_attributes></primitive><primitive id="res2" class="ocf" provider="heartbeat" type="apache"/>"#;

pub const ORDER_XML: &str = r#"<rsc_order id="res1-then-res2" first="res1" then="res2" score="INFINITY"/>"#;

pub fn cib(epoch: u64, constraints: &str) -> String {
    format!(
        r#"<cib admin_epoch="0" epoch="{epoch}" num_updates="0"><configuration><nodes><node id="1" uname="a"/><node id="2" uname="b"/></nodes><resources>{RESOURCES}</resources><constraints>{constraints}</constraints></configuration></cib>"#
    )
}

pub fn crm_mon() -> String {
    r#"<crm_mon version="2.0.5"><summary><current_dc present="true" name="a"/></summary><nodes><node name="a" online="true" standby="false" is_dc="true"/><node name="b" online="true" standby="false" is_dc="false"/></nodes><resources><resource id="res1" role="Started" active="true" managed="true" failed="false"><node name="a"/></resource><resource id="res2" role="Started" active="true" managed="true" failed="false"><node name="a"/></resource></resources></crm_mon>"#.to_string()
}

pub fn drbd_status(peer: &str, role: &str, peer_role: &str) -> String {
    format!(
        "r0 node-id:0 role:{role} suspended:no\n  volume:0 minor:0 disk:UpToDate\n  {peer} connection:Connected role:{peer_role}\n    volume:0 peer-disk:UpToDate\n"
    )
}

/// What `crm_simulate` would leave behind after applying `constraints`.
pub fn simulated_output(constraints: &str) -> String {
    format!("{}\n{}\n{}\n", cib(8, constraints), STATUS_MARKER, crm_mon())
}

/// The graph a clean poll of the fixture cluster produces, built offline.
pub fn committed_graph() -> ClusterGraph {
    let mut snapshots = BTreeMap::new();
    for (host, peer, role, peer_role) in [("a", "b", "Primary", "Secondary"), ("b", "a", "Secondary", "Primary")] {
        let outputs: BTreeMap<String, String> = [
            (names::CLUSTER_CONFIG, cib(7, "")),
            (names::CLUSTER_STATUS, crm_mon()),
            (names::STORAGE_CONFIG, DRBD_DUMP.to_string()),
            (names::STORAGE_STATUS, drbd_status(peer, role, peer_role)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        snapshots.insert(
            HostId::new(host),
            HostSnapshot::available(parse_host_status(&outputs), ConnectionState::Connected, Utc::now()),
        );
    }
    ClusterGraph::rebuild_from(snapshots)
}

pub fn rid(s: &str) -> ResourceId {
    ResourceId::new(s)
}

pub fn cid(s: &str) -> ConstraintId {
    ConstraintId::new(s)
}

pub struct TestCluster {
    pub transport: Arc<ScriptedTransport>,
    pub sync: Arc<ClusterSync>,
    pub engine: EditEngine,
    pub config: EngineConfig,
}

impl TestCluster {
    /// Cluster whose hosts answer every status command; nothing is polled yet.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on_any("crm_mon --one-shot", ScriptedReply::ok(crm_mon()));
        transport.on_any("cibadmin --query --local", ScriptedReply::ok(cib(7, "")));
        transport.on_any("drbdadm dump", ScriptedReply::ok(DRBD_DUMP));
        transport.on("a", "drbdsetup status", ScriptedReply::ok(drbd_status("b", "Primary", "Secondary")));
        transport.on("b", "drbdsetup status", ScriptedReply::ok(drbd_status("a", "Secondary", "Primary")));

        let mut config = EngineConfig {
            hosts: vec![HostEntry::new("a", "10.0.0.1"), HostEntry::new("b", "10.0.0.2")],
            poll_timeout_secs: 5,
            command_timeout_secs: 10,
            kill_timeout_secs: 1,
            poll_commands: ["cluster.status", "cluster.config", "storage.status", "storage.config"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..EngineConfig::default()
        };
        adjust(&mut config);

        let sync = Arc::new(ClusterSync::from_config(&config, transport.clone()).unwrap());
        let engine = EditEngine::from_config(sync.clone(), &config).unwrap();
        Self {
            transport,
            sync,
            engine,
            config,
        }
    }

    /// Cluster already polled once.
    pub async fn synced() -> Self {
        let cluster = Self::new();
        let report = cluster.sync.resync().await;
        assert!(report.is_healthy(), "fixture cluster should poll clean: {:?}", report);
        cluster
    }

    /// Answer simulations with `constraints` in the resulting config. Must be
    /// registered after any rule whose needle also occurs in the simulation
    /// script.
    pub fn simulate_with(&self, constraints: &str) {
        self.transport
            .on_any("crm_simulate", ScriptedReply::ok(simulated_output(constraints)));
    }

    /// Scripts run on `host` that changed something.
    pub fn mutations(&self, host: &str) -> Vec<String> {
        self.transport
            .executed(host)
            .into_iter()
            .filter(|s| {
                !s.contains("crm_simulate")
                    && !s.contains("crm_mon --one-shot")
                    && !s.contains("cibadmin --query --local")
                    && !s.contains("drbdadm dump")
                    && !s.contains("drbdsetup status")
            })
            .collect()
    }
}
