//! Inter-level message shapes
//!
//! Two message kinds flow through the tree: instructions travelling down
//! (`Command`) and state reports travelling up (`Report`). The JSON
//! encodings keep the historical field layout (`action`, `goals`, `state`,
//! `nbSteps`, `goalFound`) so traces and tooling remain compatible.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Direction, FeudalError, StateId, Task};

/// Instruction sent downward: parent to child, or lowest agent to the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reset request propagating down to the environment
    NewEpisode,
    /// Deactivation notice: a sibling took over; `state` is the new active
    /// state expressed in the sender's vocabulary
    Idle {
        /// New active state as seen by the sender
        state: StateId,
    },
    /// Task assignment to a child agent
    Assign {
        /// The delegated task
        task: Task,
        /// Goal chain (lowest-level goal first), forwarded unchanged
        goals: Vec<StateId>,
    },
    /// Primitive action applied to the environment
    Act {
        /// Requested move
        direction: Direction,
    },
}

/// Report sent upward: child to parent, or environment to the lowest agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// A child reports where it now stands, expressed as the owning agent id
    /// at the receiver's level
    Agent {
        /// Owning agent of the reporter's current state
        state: StateId,
        /// Whether the active goal was reached
        goal_found: bool,
    },
    /// The environment reports the outcome of a primitive interaction
    Observation {
        /// Resulting cell
        state: StateId,
        /// Elapsed cost of the interaction
        cost: u64,
        /// Whether the goal cell was reached
        goal_reached: bool,
    },
}

#[derive(Serialize, Deserialize)]
struct WireCommand {
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    goals: Option<Vec<StateId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<StateId>,
}

impl From<&Command> for WireCommand {
    fn from(command: &Command) -> Self {
        match command {
            Command::NewEpisode => WireCommand {
                action: "NewEpisode".to_string(),
                goals: None,
                state: None,
            },
            Command::Idle { state } => WireCommand {
                action: "Idle".to_string(),
                goals: None,
                state: Some(state.clone()),
            },
            Command::Assign { task, goals } => WireCommand {
                action: task.to_string(),
                goals: if goals.is_empty() {
                    None
                } else {
                    Some(goals.clone())
                },
                state: None,
            },
            Command::Act { direction } => WireCommand {
                action: direction.as_str().to_string(),
                goals: None,
                state: None,
            },
        }
    }
}

impl TryFrom<WireCommand> for Command {
    type Error = FeudalError;

    fn try_from(wire: WireCommand) -> Result<Self, Self::Error> {
        if wire.action == "NewEpisode" {
            return Ok(Command::NewEpisode);
        }
        if wire.action == "Idle" {
            let state = wire.state.ok_or_else(|| {
                FeudalError::Parse("Idle command without the new active state".into())
            })?;
            return Ok(Command::Idle { state });
        }
        if let Ok(direction) = wire.action.parse::<Direction>() {
            return Ok(Command::Act { direction });
        }
        let task: Task = wire.action.parse()?;
        Ok(Command::Assign {
            task,
            goals: wire.goals.unwrap_or_default(),
        })
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireCommand::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireCommand::deserialize(deserializer)?;
        Command::try_from(wire).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct WireReport {
    state: StateId,
    #[serde(rename = "goalFound", skip_serializing_if = "Option::is_none")]
    goal_found: Option<bool>,
    #[serde(rename = "nbSteps", skip_serializing_if = "Option::is_none")]
    nb_steps: Option<u64>,
    #[serde(rename = "isGoal", skip_serializing_if = "Option::is_none")]
    is_goal: Option<bool>,
}

impl From<&Report> for WireReport {
    fn from(report: &Report) -> Self {
        match report {
            Report::Agent { state, goal_found } => WireReport {
                state: state.clone(),
                goal_found: Some(*goal_found),
                nb_steps: None,
                is_goal: None,
            },
            Report::Observation {
                state,
                cost,
                goal_reached,
            } => WireReport {
                state: state.clone(),
                goal_found: None,
                nb_steps: Some(*cost),
                is_goal: Some(*goal_reached),
            },
        }
    }
}

impl From<WireReport> for Report {
    fn from(wire: WireReport) -> Self {
        match wire.nb_steps {
            Some(cost) => Report::Observation {
                state: wire.state,
                cost,
                goal_reached: wire.is_goal.unwrap_or(false),
            },
            None => Report::Agent {
                state: wire.state,
                goal_found: wire.goal_found.unwrap_or(false),
            },
        }
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireReport::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Report {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Report::from(WireReport::deserialize(deserializer)?))
    }
}
