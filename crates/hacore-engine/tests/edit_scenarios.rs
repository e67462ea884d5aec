mod common;

use common::{cid, rid, TestCluster, ORDER_XML};
use hacore_engine::{AttributeScope, EditError, EditOp, EditTarget, HostOutcome, PreviewMode, SkipReason};
use hacore_parse::{ConstraintDef, LegDef, ResourceDef, VolumeDef};
use hacore_session::testing::ScriptedReply;
use hacore_types::{HostId, Score, VolumeId};
use std::time::Duration;

fn order_op() -> EditOp {
    EditOp::AddConstraint {
        constraint: ConstraintDef::order("res1-then-res2", rid("res1"), rid("res2"), Score::POS_INFINITY),
    }
}

fn set_ip(value: &str) -> EditOp {
    EditOp::SetAttribute {
        resource: rid("res1"),
        scope: AttributeScope::Instance,
        name: "ip".to_string(),
        value: Some(value.to_string()),
    }
}

fn hosts(ids: &[&str]) -> Vec<HostId> {
    ids.iter().map(|h| HostId::new(h)).collect()
}

#[tokio::test]
async fn test_preview_then_discard_leaves_cluster_untouched() {
    let cluster = TestCluster::synced().await;
    cluster.simulate_with(ORDER_XML);

    let mut session = cluster.engine.open_session();
    session.stage(order_op()).unwrap();
    assert_eq!(
        cluster.engine.locked_targets().get(&EditTarget::Constraint(cid("res1-then-res2"))),
        Some(&session.id())
    );

    let preview = session.preview().await.unwrap();
    assert_eq!(preview.mode, PreviewMode::Functional);
    assert_eq!(preview.constraints().len(), 1);
    assert!(preview.ordered_after(&rid("res2"), &rid("res1")));
    assert!(cluster.sync.store().load().constraints().is_empty());

    // Cached until the edit changes.
    let again = session.preview().await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&preview, &again));

    session.discard();
    assert!(session.staged().is_empty());
    assert!(session.diff().is_empty());
    assert!(cluster.engine.locked_targets().is_empty());
    assert!(matches!(session.commit(&hosts(&["a"])).await, Err(EditError::EmptyEdit)));

    assert!(cluster.mutations("a").is_empty());
    assert!(cluster.mutations("b").is_empty());
}

#[tokio::test]
async fn test_commit_runs_on_authoritative_host() {
    let cluster = TestCluster::synced().await;
    cluster.transport.on_any("cibadmin --create", ScriptedReply::ok(""));
    cluster.simulate_with(ORDER_XML);

    let mut session = cluster.engine.open_session();
    session.stage(order_op()).unwrap();
    let generation = cluster.sync.store().generation();
    let result = session.commit(&hosts(&["a", "b"])).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.ops.len(), 1);
    assert_eq!(result.ops[0].hosts.len(), 1);
    assert!(result.ops[0].hosts[&HostId::new("a")].is_applied());
    assert!(result.resync.generation > generation);

    let applied = cluster.mutations("a");
    assert_eq!(applied.len(), 1);
    assert!(applied[0].contains("cibadmin --create --scope constraints"));
    assert!(applied[0].contains("res1-then-res2"));
    assert!(cluster.mutations("b").is_empty());

    assert!(session.staged().is_empty());
    assert!(cluster.engine.locked_targets().is_empty());
}

#[tokio::test]
async fn test_partial_commit_is_reported_not_rolled_back() {
    let cluster = TestCluster::synced().await;
    cluster.transport.on("a", "drbdadm disconnect", ScriptedReply::ok(""));
    cluster.transport.on(
        "b",
        "drbdadm disconnect",
        ScriptedReply::exit(10, "Failure: (162) Invalid configuration request"),
    );
    cluster.transport.on_any("crm_resource", ScriptedReply::ok(""));
    cluster.simulate_with("");

    let mut session = cluster.engine.open_session();
    session
        .stage(EditOp::SetVolumeConnection {
            volume: VolumeId::new("r0"),
            connected: false,
        })
        .unwrap();
    session
        .stage(EditOp::SetAttribute {
            resource: rid("res1"),
            scope: AttributeScope::Meta,
            name: "target-role".to_string(),
            value: Some("Stopped".to_string()),
        })
        .unwrap();

    let result = session.commit(&hosts(&["a", "b"])).await.unwrap();
    assert!(!result.is_success());

    let disconnect = &result.ops[0];
    assert_eq!(disconnect.hosts[&HostId::new("a")], HostOutcome::Applied);
    match &disconnect.hosts[&HostId::new("b")] {
        HostOutcome::Failed(reason) => {
            assert!(reason.starts_with("storage.disconnect"));
            assert!(reason.contains("exit code 10"));
        }
        other => panic!("expected failure on b, got {:?}", other),
    }
    assert_eq!(
        result.ops[1].hosts[&HostId::new("a")],
        HostOutcome::Skipped(SkipReason::DueToEarlierFailure)
    );

    let failures = result.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1, &HostId::new("b"));

    // Host a keeps its change; nothing reconnects it or touches the resource.
    let applied = cluster.mutations("a");
    assert_eq!(applied.len(), 1);
    assert!(applied[0].contains("drbdadm disconnect r0"));
    assert!(applied.iter().all(|s| !s.contains("drbdadm connect") && !s.contains("crm_resource")));

    // Neither op reached every host, so both stay staged and locked for a retry.
    assert_eq!(session.staged().len(), 2);
    assert_eq!(cluster.engine.locked_targets().len(), 2);
}

fn new_volume(id: &str) -> EditOp {
    let leg = |host: &str, address: &str| LegDef {
        host: HostId::new(host),
        device: "/dev/drbd1".to_string(),
        disk: "/dev/sdc".to_string(),
        meta_disk: "internal".to_string(),
        address: address.to_string(),
        port: Some(7790),
        node_id: None,
    };
    EditOp::AddVolume {
        spec: VolumeDef {
            id: VolumeId::new(id),
            legs: vec![leg("a", "10.0.0.1"), leg("b", "10.0.0.2")],
            protocol: None,
        },
    }
}

fn count(scripts: &[String], needle: &str) -> usize {
    scripts.iter().filter(|s| s.contains(needle)).count()
}

#[tokio::test]
async fn test_retry_resumes_only_unfinished_work() {
    let cluster = TestCluster::synced().await;
    cluster.transport.on_any("drbd.d", ScriptedReply::ok(""));
    cluster.transport.on_any("drbdadm create-md", ScriptedReply::ok(""));
    cluster.transport.on("b", "drbdadm create-md", ScriptedReply::exit(1, "open(/dev/sdc) failed"));
    cluster.transport.on_any("drbdadm up", ScriptedReply::ok(""));
    cluster.transport.on_any("crm_resource", ScriptedReply::ok(""));
    cluster.simulate_with("");

    let mut session = cluster.engine.open_session();
    session.stage(set_ip("10.0.0.51")).unwrap();
    session.stage(new_volume("r1")).unwrap();

    let first = session.commit(&hosts(&["a", "b"])).await.unwrap();
    assert!(!first.is_success());
    assert!(first.ops[0].hosts.values().all(HostOutcome::is_applied));
    assert_eq!(first.ops[1].hosts[&HostId::new("a")], HostOutcome::Applied);

    // The applied attribute write is gone; the volume stays staged and locked.
    assert_eq!(session.staged(), &[new_volume("r1")]);
    let locked = cluster.engine.locked_targets();
    assert!(locked.contains_key(&EditTarget::Volume(VolumeId::new("r1"))));
    assert!(!locked.contains_key(&EditTarget::Resource(rid("res1"))));

    cluster.transport.on("b", "drbdadm create-md", ScriptedReply::ok(""));
    cluster.simulate_with("");
    let retry = session.commit(&hosts(&["a", "b"])).await.unwrap();
    assert!(retry.is_success(), "{:?}", retry.failures());
    assert_eq!(retry.ops.len(), 1);
    assert_eq!(retry.ops[0].hosts.keys().collect::<Vec<_>>(), vec![&HostId::new("b")]);

    // Nothing that already succeeded runs twice.
    let on_a = cluster.mutations("a");
    assert_eq!(count(&on_a, "drbdadm create-md --force r1"), 1);
    assert_eq!(count(&on_a, "drbdadm up r1"), 1);
    assert_eq!(count(&on_a, "crm_resource"), 1);
    let on_b = cluster.mutations("b");
    assert_eq!(count(&on_b, "drbdadm create-md --force r1"), 2);
    assert_eq!(count(&on_b, "drbdadm up r1"), 1);

    assert!(session.staged().is_empty());
    assert!(cluster.engine.locked_targets().is_empty());
}

#[tokio::test]
async fn test_commit_preflight_rejections() {
    let cluster = TestCluster::synced().await;
    let mut session = cluster.engine.open_session();
    assert!(matches!(session.commit(&hosts(&["a"])).await, Err(EditError::EmptyEdit)));

    session
        .stage(EditOp::SetVolumeRole {
            volume: VolumeId::new("r0"),
            host: HostId::new("b"),
            role: hacore_types::LegRole::Secondary,
        })
        .unwrap();
    session
        .stage(EditOp::SetVolumeConnection {
            volume: VolumeId::new("r0"),
            connected: false,
        })
        .unwrap();

    assert!(matches!(session.commit(&[]).await, Err(EditError::NoTargets)));
    assert!(matches!(
        session.commit(&hosts(&["zeta"])).await,
        Err(EditError::UnknownHost(h)) if h == HostId::new("zeta")
    ));
    match session.commit(&hosts(&["b"])).await {
        Err(EditError::HostNotTargeted { host, op }) => {
            assert_eq!(host, HostId::new("a"));
            assert_eq!(op, "disconnect volume r0");
        }
        other => panic!("expected HostNotTargeted, got {:?}", other.map(|r| r.is_success())),
    }

    assert!(cluster.mutations("a").is_empty());
    assert!(cluster.mutations("b").is_empty());
    assert_eq!(session.staged().len(), 2);
}

#[tokio::test]
async fn test_targets_are_exclusive_across_sessions() {
    let cluster = TestCluster::synced().await;
    let mut first = cluster.engine.open_session();
    let mut second = cluster.engine.open_session();

    first.stage(set_ip("10.0.0.51")).unwrap();
    match second.stage(set_ip("10.0.0.52")) {
        Err(EditError::AlreadyBeingEdited { target, holder }) => {
            assert_eq!(target, EditTarget::Resource(rid("res1")));
            assert_eq!(holder, first.id());
        }
        other => panic!("expected AlreadyBeingEdited, got {:?}", other),
    }

    // A group over res2 and res1 fails on res1 without keeping g or res2.
    let group = EditOp::AddResource {
        spec: ResourceDef::group("g", vec![rid("res2"), rid("res1")]),
    };
    assert!(matches!(second.stage(group.clone()), Err(EditError::AlreadyBeingEdited { .. })));
    let locked = cluster.engine.locked_targets();
    assert_eq!(locked.len(), 1);
    assert!(locked.values().all(|holder| *holder == first.id()));
    assert!(second.staged().is_empty());

    drop(first);
    assert!(cluster.engine.locked_targets().is_empty());
    second.stage(group).unwrap();
    assert_eq!(cluster.engine.locked_targets().len(), 3);
}

#[tokio::test]
async fn test_rejected_op_leaves_edit_unchanged() {
    let cluster = TestCluster::synced().await;
    let mut session = cluster.engine.open_session();
    session.stage(set_ip("10.0.0.51")).unwrap();
    let generation = session.generation();

    let missing = session.stage(EditOp::RemoveResource { id: rid("res9") });
    assert!(matches!(missing, Err(EditError::UnknownResource(r)) if r == rid("res9")));
    assert_eq!(session.staged().len(), 1);
    assert_eq!(session.generation(), generation);
    assert!(!cluster
        .engine
        .locked_targets()
        .contains_key(&EditTarget::Resource(rid("res9"))));
}

#[tokio::test]
async fn test_restating_committed_values_normalizes_away() {
    let cluster = TestCluster::synced().await;
    let mut session = cluster.engine.open_session();
    session.stage(set_ip("10.0.0.51")).unwrap();
    session.stage(set_ip("10.0.0.50")).unwrap();

    assert_eq!(session.staged().len(), 2);
    assert!(session.diff().is_empty());
    assert!(matches!(session.commit(&hosts(&["a"])).await, Err(EditError::EmptyEdit)));

    session.stage(order_op()).unwrap();
    session
        .stage(EditOp::RemoveConstraint {
            id: cid("res1-then-res2"),
        })
        .unwrap();
    assert!(session.diff().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_host_is_isolated_within_poll_budget() {
    let cluster = TestCluster::new();
    cluster.transport.on("b", "drbdsetup status", ScriptedReply::hang());

    let started = tokio::time::Instant::now();
    let report = cluster.sync.resync().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(7), "resync took {:?}", elapsed);
    assert_eq!(report.unavailable, hosts(&["b"]));
    assert_eq!(cluster.transport.kills("b"), 1);
    assert_eq!(cluster.transport.kills("a"), 0);

    let graph = cluster.sync.store().load();
    assert!(graph.host(&HostId::new("a")).unwrap().is_available());
    assert!(graph.host(&HostId::new("b")).unwrap().unavailable.is_some());
    assert_eq!(graph.resources().count(), 2);
}

#[tokio::test]
async fn test_constrained_resource_cannot_join_group() {
    let cluster = TestCluster::synced().await;
    let mut session = cluster.engine.open_session();
    session.stage(order_op()).unwrap();

    let group = EditOp::AddResource {
        spec: ResourceDef::group("g", vec![rid("res1")]),
    };
    match session.stage(group) {
        Err(EditError::InUse { resource, by }) => {
            assert_eq!(resource, rid("res1"));
            assert_eq!(by, "constraint res1-then-res2");
        }
        other => panic!("expected InUse, got {:?}", other),
    }
    assert_eq!(session.staged(), &[order_op()]);
    let locked = cluster.engine.locked_targets();
    assert!(!locked.contains_key(&EditTarget::Resource(rid("g"))));
    assert!(!locked.contains_key(&EditTarget::Resource(rid("res1"))));
}
