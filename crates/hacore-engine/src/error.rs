//! Error types for the engine.

use crate::edit::EditTarget;
use hacore_session::{CommandError, CommandTableError};
use hacore_types::{ConstraintId, HostId, ResourceId, VolumeId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors staging or committing an edit.
#[derive(Debug, Error)]
pub enum EditError {
    /// Another live edit session holds the target.
    #[error("{target} is already being edited by session {holder}")]
    AlreadyBeingEdited {
        /// Contested target.
        target: EditTarget,
        /// Session holding it.
        holder: uuid::Uuid,
    },

    /// No such resource in the committed graph or the staged edit.
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// No such host.
    #[error("unknown host: {0}")]
    UnknownHost(HostId),

    /// No such volume.
    #[error("unknown volume: {0}")]
    UnknownVolume(VolumeId),

    /// No such constraint.
    #[error("unknown constraint: {0}")]
    UnknownConstraint(ConstraintId),

    /// The id is already taken.
    #[error("{kind} {id} already exists")]
    DuplicateId {
        /// Entity kind.
        kind: &'static str,
        /// Taken id.
        id: String,
    },

    /// A constraint's endpoints are unusable.
    #[error("constraint {constraint} has invalid endpoints: {detail}")]
    InvalidEndpoints {
        /// Constraint id.
        constraint: ConstraintId,
        /// What is wrong.
        detail: String,
    },

    /// A resource or volume definition is unusable.
    #[error("invalid definition for {id}: {detail}")]
    InvalidSpec {
        /// Resource or volume id.
        id: String,
        /// What is wrong.
        detail: String,
    },

    /// Removing the resource would leave a dangling reference.
    #[error("resource {resource} is still referenced by {by}")]
    InUse {
        /// Resource being removed.
        resource: ResourceId,
        /// Referencing constraint or parent.
        by: String,
    },

    /// The host does not hold a leg of the volume.
    #[error("host {host} holds no leg of volume {volume}")]
    NotALeg {
        /// Volume.
        volume: VolumeId,
        /// Host.
        host: HostId,
    },

    /// Promoting would give the volume two primaries while connected.
    #[error("volume {volume} is already primary on connected peer {peer}")]
    PeerAlreadyPrimary {
        /// Volume.
        volume: VolumeId,
        /// Primary peer.
        peer: HostId,
    },

    /// Nothing to commit after normalization.
    #[error("the staged edit is empty")]
    EmptyEdit,

    /// Commit called without target hosts.
    #[error("no target hosts given")]
    NoTargets,

    /// A storage op needs a host outside the target set.
    #[error("{op} needs host {host}, which is not a commit target")]
    HostNotTargeted {
        /// Op description.
        op: String,
        /// Missing host.
        host: HostId,
    },

    /// Simulation of the staged edit failed.
    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    /// An op could not be rendered into commands.
    #[error("command table error: {0}")]
    CommandTable(#[from] CommandTableError),
}

/// Errors running a dry-run simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// There is no host to simulate on.
    #[error("no host available to run the simulation")]
    NoHost,

    /// The simulation command could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The simulation exited non-zero.
    #[error("simulation on {host} exited {exit_code}: {detail}")]
    Failed {
        /// Simulating host.
        host: HostId,
        /// Exit code.
        exit_code: i32,
        /// Stderr summary.
        detail: String,
    },

    /// The simulator output could not be read.
    #[error("unparsable simulation output: {0}")]
    Unparsable(String),

    /// The simulation command could not be rendered.
    #[error("cannot render simulation command: {0}")]
    Render(String),
}

impl From<CommandTableError> for SimulationError {
    fn from(e: CommandTableError) -> Self {
        SimulationError::Render(e.to_string())
    }
}

/// Errors loading the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// TOML syntax or schema error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or schema error.
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither `.toml` nor `.json`.
    #[error("unsupported config format: {0}")]
    UnsupportedExtension(String),

    /// Two host entries share a name.
    #[error("duplicate host: {0}")]
    DuplicateHost(HostId),

    /// A timeout or interval is zero.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// The poll command set is empty.
    #[error("poll command set is empty")]
    EmptyCommandSet,

    /// A configured command is unusable.
    #[error(transparent)]
    CommandTable(#[from] CommandTableError),
}
