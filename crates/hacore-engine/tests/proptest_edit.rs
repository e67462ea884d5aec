//! Property tests for edit normalization and lock bookkeeping.

mod common;

use common::{cid, committed_graph, rid, TestCluster};
use hacore_engine::edit::normalize;
use hacore_engine::{AttributeScope, EditOp, EditSession, WorkingSet};
use hacore_parse::{ConstraintDef, ResourceDef};
use hacore_types::Score;
use proptest::prelude::*;
use std::collections::HashSet;

fn attribute_op() -> impl Strategy<Value = EditOp> {
    (
        prop_oneof![Just("res1"), Just("res2")],
        prop_oneof![Just(AttributeScope::Instance), Just(AttributeScope::Meta)],
        prop_oneof![Just("ip"), Just("port")],
        prop_oneof![
            Just(None),
            Just(Some("10.0.0.50")),
            Just(Some("10.0.0.51")),
            Just(Some("8080"))
        ],
    )
        .prop_map(|(resource, scope, name, value)| EditOp::SetAttribute {
            resource: rid(resource),
            scope,
            name: name.to_string(),
            value: value.map(str::to_string),
        })
}

fn constraint_op() -> impl Strategy<Value = EditOp> {
    (prop_oneof![Just("c1"), Just("c2")], any::<bool>()).prop_map(|(id, add)| {
        if add {
            EditOp::AddConstraint {
                constraint: ConstraintDef::order(id, rid("res1"), rid("res2"), Score::POS_INFINITY),
            }
        } else {
            EditOp::RemoveConstraint { id: cid(id) }
        }
    })
}

fn edit() -> impl Strategy<Value = Vec<EditOp>> {
    prop::collection::vec(prop_oneof![3 => attribute_op(), 1 => constraint_op()], 0..16)
}

fn is_subsequence(short: &[EditOp], long: &[EditOp]) -> bool {
    let mut rest = long.iter();
    short.iter().all(|op| rest.any(|candidate| candidate == op))
}

fn lockable_op() -> impl Strategy<Value = EditOp> {
    let id = prop_oneof![Just("r1"), Just("r2"), Just("r3")];
    prop_oneof![
        id.clone().prop_map(|id| EditOp::AddResource {
            spec: ResourceDef::primitive(id, "ocf:heartbeat:Dummy"),
        }),
        id.clone().prop_map(|id| EditOp::RemoveResource { id: rid(id) }),
        (id.clone(), id).prop_map(|(a, b)| EditOp::AddResource {
            spec: ResourceDef::group("g", vec![rid(a), rid(b)]),
        }),
    ]
}

fn assert_locks_cover(cluster: &TestCluster, sessions: &[&EditSession]) {
    let locked = cluster.engine.locked_targets();
    let live: HashSet<_> = sessions.iter().map(|s| s.id()).collect();
    assert!(locked.values().all(|holder| live.contains(holder)));
    for session in sessions {
        for op in session.staged() {
            for target in op.targets() {
                assert_eq!(locked.get(&target), Some(&session.id()), "{} not held", target);
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_normalize_is_idempotent(ops in edit()) {
        let committed = WorkingSet::from_graph(&committed_graph());
        let once = normalize(&ops, &committed);
        let twice = normalize(&once, &committed);
        prop_assert_eq!(&once, &twice);
        prop_assert!(is_subsequence(&once, &ops));
    }

    #[test]
    fn prop_normalize_keeps_one_write_per_attribute(ops in edit()) {
        let committed = WorkingSet::from_graph(&committed_graph());
        let mut seen = HashSet::new();
        for op in normalize(&ops, &committed) {
            if let EditOp::SetAttribute { resource, scope, name, value } = op {
                prop_assert!(seen.insert((resource.clone(), scope, name.clone())));
                prop_assert_ne!(committed.attribute(&resource, scope, &name), value.as_ref());
            }
        }
    }

    #[test]
    fn prop_normalized_edit_ends_in_same_state(ops in edit()) {
        let committed = WorkingSet::from_graph(&committed_graph());
        let mut full = committed.clone();
        for op in &ops {
            full.apply(op);
        }
        let mut short = committed.clone();
        for op in normalize(&ops, &committed) {
            short.apply(&op);
        }
        for resource in ["res1", "res2"] {
            for scope in [AttributeScope::Instance, AttributeScope::Meta] {
                for name in ["ip", "port"] {
                    prop_assert_eq!(
                        full.attribute(&rid(resource), scope, name),
                        short.attribute(&rid(resource), scope, name)
                    );
                }
            }
        }
    }

    #[test]
    fn prop_locks_follow_staged_ops(steps in prop::collection::vec((any::<bool>(), lockable_op()), 0..24)) {
        let cluster = TestCluster::new();
        let mut first = cluster.engine.open_session();
        let mut second = cluster.engine.open_session();
        for (use_first, op) in steps {
            let session = if use_first { &mut first } else { &mut second };
            let _ = session.stage(op);
            assert_locks_cover(&cluster, &[&first, &second]);
        }
        first.discard();
        assert_locks_cover(&cluster, &[&second]);
        drop(second);
        prop_assert!(cluster.engine.locked_targets().is_empty());
    }
}
