#![warn(missing_docs)]

//! HACore shared types: normalized identifiers, placement scores and the closed
//! status vocabularies every layer agrees on.

pub mod ids;
pub mod score;
pub mod status;

pub use ids::{ConstraintId, HostId, ResourceId, VolumeId};
pub use score::{Score, ScoreParseError, INFINITY};
pub use status::{
    ConnectionState, DiskState, LegRole, ResourceRole, ResourceStatus, VolumeConnection,
};
