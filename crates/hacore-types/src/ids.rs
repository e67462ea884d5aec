//! Identifier newtypes.
//!
//! Every identifier is normalized on construction so that ids taken from
//! different hosts, different tools and different polls compare equal.
//! Deserialization goes through the same normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $normalize:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Build a normalized id.
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self($normalize(raw.as_ref()))
            }

            /// The normalized id text.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if normalization left nothing behind.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Cluster node name.
    HostId,
    normalize_host
);
string_id!(
    /// Resource id. Clone instance suffixes are folded into the base id.
    ResourceId,
    normalize_resource
);
string_id!(
    /// Constraint id.
    ConstraintId,
    normalize_plain
);
string_id!(
    /// Replicated storage volume id.
    VolumeId,
    normalize_plain
);

/// Lowercase, trim, drop one trailing dot (`node1.example.com.`).
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

/// Trim and fold `name:N` clone instance ids into `name`.
pub fn normalize_resource(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.rsplit_once(':') {
        Some((base, instance))
            if !base.is_empty()
                && !instance.is_empty()
                && instance.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base.to_string()
        }
        _ => trimmed.to_string(),
    }
}

fn normalize_plain(raw: &str) -> String {
    raw.trim().to_string()
}
