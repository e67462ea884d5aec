#![warn(missing_docs)]

//! HACore cluster graph: the unified model of hosts, resources, constraints
//! and replicated volumes, rebuilt wholesale from per-host snapshots and
//! published copy-on-write.

pub mod graph;
pub mod model;
pub mod query;
pub mod snapshot;
pub mod store;

pub use graph::ClusterGraph;
pub use model::{Constraint, GraphWarning, Host, Leg, Resource, StorageVolume};
pub use snapshot::{HostSnapshot, SnapshotData};
pub use store::GraphStore;
