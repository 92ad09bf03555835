//! Saving and restoring learned models
//!
//! One JSON file per agent, holding the discovered tasks, the per-state
//! action sets and the learned tables. The field layout follows the
//! historical format (`nbSample`, `qValue`, ...) so files written by
//! earlier tooling remain loadable, and every map is insertion-ordered so
//! a load immediately followed by a save reproduces the file byte for
//! byte.

use std::io::ErrorKind;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use feudal_rl_core::{Action, Result, StateId, Task};

/// On-disk snapshot of one node's learned tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Format version
    #[serde(default = "ModelSnapshot::default_version")]
    pub version: u32,
    /// Discovered exit tasks
    pub tasks: Vec<Task>,
    /// Per-state legal actions
    pub actions: IndexMap<StateId, Vec<Action>>,
    /// Observed destinations per state and action, in first-seen order
    #[serde(rename = "destinationStates")]
    pub destination_states: IndexMap<StateId, IndexMap<Action, Vec<StateId>>>,
    /// Sample counts per state and action
    #[serde(rename = "nbSample")]
    pub nb_sample: IndexMap<StateId, IndexMap<Action, u64>>,
    /// Transition counts per state, action and destination
    #[serde(rename = "nbTransition")]
    pub nb_transition: IndexMap<StateId, IndexMap<Action, IndexMap<StateId, u64>>>,
    /// Cumulative transition costs per state, action and destination
    #[serde(rename = "cumulTransitionCost")]
    pub cumul_transition_cost: IndexMap<StateId, IndexMap<Action, IndexMap<StateId, u64>>>,
    /// Q values per task, state and action
    #[serde(rename = "qValue")]
    pub q_value: IndexMap<Task, IndexMap<StateId, IndexMap<Action, f64>>>,
}

impl ModelSnapshot {
    /// Current format version
    pub const VERSION: u32 = 1;

    fn default_version() -> u32 {
        Self::VERSION
    }

    /// Serialize to the on-disk JSON representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse the on-disk JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the snapshot to `path`, overwriting any previous file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).await?;
        info!(path = %path.display(), "model saved");
        Ok(())
    }

    /// Load a snapshot from `path`.
    ///
    /// A missing file is recoverable: a warning is logged and `None` is
    /// returned so the caller continues with fresh tables. Any other
    /// failure (unreadable file, malformed JSON) is an error.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path).await {
            Ok(json) => Ok(Some(Self::from_json(&json)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "persisted model not found, starting fresh");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }
}
