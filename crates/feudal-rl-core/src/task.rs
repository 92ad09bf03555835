//! Tasks: goals held by an agent or delegated down the hierarchy

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{FeudalError, StateId};

/// A goal descriptor.
///
/// `ExitTo` tasks are learnable (they key the Q table) and are registered
/// lazily the first time a transition reveals the exit; the others are
/// management pseudo-tasks that never enter the learned tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Task {
    /// No task; wait for instructions
    Idle,
    /// Reset request propagating down to the environment
    NewEpisode,
    /// Free exploration of the local partition
    Explore,
    /// Move greedily towards the active goal
    FindGoal,
    /// Leave the partition towards the named external state
    ExitTo(StateId),
}

impl Task {
    /// Terminal state of an `ExitTo` task, if any.
    #[must_use]
    pub fn terminal_state(&self) -> Option<&StateId> {
        match self {
            Task::ExitTo(state) => Some(state),
            _ => None,
        }
    }

    /// Whether this is a management pseudo-task rather than a learnable goal.
    #[must_use]
    pub fn is_management(&self) -> bool {
        !matches!(self, Task::ExitTo(_))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Idle => f.write_str("Idle"),
            Task::NewEpisode => f.write_str("NewEpisode"),
            Task::Explore => f.write_str("Explore"),
            Task::FindGoal => f.write_str("FindGoal"),
            Task::ExitTo(state) => write!(f, "ExitTo{state}"),
        }
    }
}

impl FromStr for Task {
    type Err = FeudalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(Task::Idle),
            "NewEpisode" => Ok(Task::NewEpisode),
            "Explore" => Ok(Task::Explore),
            "FindGoal" => Ok(Task::FindGoal),
            other => match other.strip_prefix("ExitTo") {
                Some(target) if !target.is_empty() => Ok(Task::ExitTo(StateId::from(target))),
                _ => Err(FeudalError::Parse(format!("unknown task: {other}"))),
            },
        }
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = String::deserialize(deserializer)?;
        wire.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_round_trip_through_the_wire_encoding() {
        let tasks = [
            Task::Idle,
            Task::NewEpisode,
            Task::Explore,
            Task::FindGoal,
            Task::ExitTo(StateId::from("B3")),
        ];
        for task in tasks {
            let parsed: Task = task.to_string().parse().unwrap();
            assert_eq!(parsed, task);
        }
    }

    #[test]
    fn only_exit_tasks_have_a_terminal_state() {
        assert_eq!(Task::FindGoal.terminal_state(), None);
        assert_eq!(
            Task::ExitTo(StateId::from("A1")).terminal_state(),
            Some(&StateId::from("A1"))
        );
        assert!(Task::Explore.is_management());
        assert!(!Task::ExitTo(StateId::from("A1")).is_management());
    }
}
