//! The environment contract seen by the lowest hierarchy level

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Direction, Result, SimTime, StateId};

/// Result of one environment interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvStep {
    /// Resulting state
    pub state: StateId,
    /// Elapsed cost (duration) of the interaction
    #[serde(rename = "nbSteps")]
    pub cost: u64,
    /// Whether the goal cell was reached
    #[serde(rename = "isGoal")]
    pub goal_reached: bool,
}

/// Contract of the external environment.
///
/// The environment owns all stochasticity: action slippage, boundary
/// clamping and episode-reset placement happen behind this trait. Agents
/// only ever see the resulting state, its cost and the goal flag.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Start a new episode, placing the agent on a uniformly random legal
    /// state.
    async fn reset(&mut self) -> Result<EnvStep>;

    /// Apply a primitive action from the current position.
    async fn apply(&mut self, direction: Direction) -> Result<EnvStep>;

    /// All states of this environment, in a stable order.
    fn states(&self) -> Vec<StateId>;
}

/// Statistics for one episode driven by the top-level agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode id
    pub id: String,
    /// Cell the episode started in
    pub start_state: Option<StateId>,
    /// Simulated start time
    pub start_time: SimTime,
    /// Simulated length, filled on completion
    pub length: Option<u64>,
    /// Running mean episode length at completion time
    pub mean_length: f64,
    /// Whether the episode was cut short by the warm-up cap
    pub truncated: bool,
    /// Wall-clock start
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Wall-clock end
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Episode {
    /// Start a new episode record.
    #[must_use]
    pub fn begin(start_state: Option<StateId>, start_time: SimTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_state,
            start_time,
            length: None,
            mean_length: 0.0,
            truncated: false,
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }

    /// Close the record with its observed length and the running mean.
    pub fn complete(&mut self, length: u64, mean_length: f64, truncated: bool) {
        self.length = Some(length);
        self.mean_length = mean_length;
        self.truncated = truncated;
        self.ended_at = Some(chrono::Utc::now());
    }
}
