//! Placement scores.
//!
//! Scores live in `[-INFINITY, +INFINITY]` with `INFINITY = 100000`. The two
//! infinities are saturating: they mean mandatory and forbidden placement and
//! never combine arithmetically with finite scores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Magnitude of an infinite score.
pub const INFINITY: i64 = 100_000;

/// Error returned for text that is not a score.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid score: {0:?}")]
pub struct ScoreParseError(pub String);

/// A clamped placement score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(i64);

impl Score {
    /// Mandatory placement.
    pub const POS_INFINITY: Score = Score(INFINITY);
    /// Forbidden placement.
    pub const NEG_INFINITY: Score = Score(-INFINITY);
    /// Neutral score.
    pub const ZERO: Score = Score(0);

    /// Build a score, clamping to the infinities.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(-INFINITY, INFINITY))
    }

    /// Raw value.
    pub fn value(self) -> i64 {
        self.0
    }

    /// True for either infinity.
    pub fn is_infinite(self) -> bool {
        self.0.abs() == INFINITY
    }

    /// True for `+INFINITY`.
    pub fn is_mandatory(self) -> bool {
        self.0 == INFINITY
    }

    /// True for `-INFINITY`.
    pub fn is_forbidden(self) -> bool {
        self.0 == -INFINITY
    }

    /// Pick the score that dominates when several constraints apply to the
    /// same pair: `-INFINITY`, then `+INFINITY`, then the larger magnitude.
    /// Equal magnitudes of opposite sign resolve to the negative score.
    pub fn extreme(self, other: Score) -> Score {
        if self.is_forbidden() || other.is_forbidden() {
            return Score::NEG_INFINITY;
        }
        if self.is_mandatory() || other.is_mandatory() {
            return Score::POS_INFINITY;
        }
        match self.0.abs().cmp(&other.0.abs()) {
            std::cmp::Ordering::Greater => self,
            std::cmp::Ordering::Less => other,
            std::cmp::Ordering::Equal => Score(self.0.min(other.0)),
        }
    }

    /// Sum two scores. `-INFINITY` wins over `+INFINITY`, infinities absorb
    /// finite values, finite sums clamp.
    pub fn saturating_add(self, other: Score) -> Score {
        if self.is_forbidden() || other.is_forbidden() {
            return Score::NEG_INFINITY;
        }
        if self.is_mandatory() || other.is_mandatory() {
            return Score::POS_INFINITY;
        }
        Score::new(self.0.saturating_add(other.0))
    }

    /// Map an order `kind` keyword to its equivalent score.
    pub fn from_order_kind(kind: &str) -> Option<Score> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "mandatory" => Some(Score::POS_INFINITY),
            "optional" | "serialize" => Some(Score::ZERO),
            _ => None,
        }
    }
}

impl Default for Score {
    fn default() -> Self {
        Score::ZERO
    }
}

impl FromStr for Score {
    type Err = ScoreParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        match text.to_ascii_lowercase().as_str() {
            "infinity" | "+infinity" | "inf" | "+inf" => return Ok(Score::POS_INFINITY),
            "-infinity" | "-inf" => return Ok(Score::NEG_INFINITY),
            _ => {}
        }
        text.strip_prefix('+')
            .unwrap_or(text)
            .parse::<i64>()
            .map(Score::new)
            .map_err(|_| ScoreParseError(raw.to_string()))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            INFINITY => f.write_str("INFINITY"),
            v if v == -INFINITY => f.write_str("-INFINITY"),
            v => write!(f, "{}", v),
        }
    }
}
