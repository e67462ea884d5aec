#![warn(missing_docs)]

//! HACore engine: polls every host, keeps the published cluster graph in
//! step, and applies staged configuration edits transactionally after a
//! dry-run simulation.

pub mod cli;
pub mod config;
pub mod edit;
pub mod error;
pub mod poller;
pub mod simulate;
pub mod sync;
pub mod translate;
pub mod working;

pub use config::{EngineConfig, HostEntry};
pub use edit::{
    AttributeScope, CommitResult, EditEngine, EditOp, EditSession, EditTarget, HostOutcome, OpReport, SkipReason,
};
pub use error::{ConfigError, EditError, SimulationError};
pub use poller::{Poller, RawStatus};
pub use simulate::{DryRunSimulator, PreviewGraph, PreviewMode};
pub use sync::{ClusterSync, SyncReport};
pub use working::WorkingSet;
