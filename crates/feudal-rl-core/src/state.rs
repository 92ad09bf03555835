//! State and agent identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated time, advanced only by environment step costs.
pub type SimTime = u64;

/// Opaque identifier of a state in the partitioned space.
///
/// At the lowest level these name environment cells (`"c12"`); one level up,
/// a state is the identifier of a lower-level agent (`"A2"`), so the same
/// type serves every level of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub String);

impl StateId {
    /// Create a state id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of an agent.
///
/// An upper level's states are exactly the agent ids of the level below, so
/// agents and states share one representation.
pub type AgentId = StateId;
