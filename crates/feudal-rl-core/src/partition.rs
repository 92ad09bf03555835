//! Partition specifications: how the state space is split into levels

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{AgentId, FeudalError, Result, StateId};

/// Partition of the state space into levels of agents, lowest level first.
///
/// Level 0 maps each lowest-level agent to the environment states it owns;
/// every level above maps an agent to the agents of the level below. The
/// last level holds the single top agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// level -> agent id -> member states, lowest level first
    pub levels: Vec<IndexMap<AgentId, Vec<StateId>>>,
    /// Declared adjacency between partitions (agent -> reachable exits).
    /// Informational: learning discovers its own exits, this table only
    /// documents the topology for validation and tooling.
    #[serde(default)]
    pub exits: IndexMap<AgentId, Vec<AgentId>>,
}

impl PartitionSpec {
    /// Validate the partition against the environment's state set.
    ///
    /// Every environment state must be owned by exactly one lowest-level
    /// agent, every level above must cover the agents of the level below
    /// exactly once, and a single agent must sit at the top.
    pub fn validate(&self, env_states: &[StateId]) -> Result<()> {
        if self.levels.is_empty() {
            return Err(FeudalError::Configuration("partition has no levels".into()));
        }

        let mut owned = IndexSet::new();
        for (agent, members) in &self.levels[0] {
            if members.is_empty() {
                return Err(FeudalError::Configuration(format!(
                    "agent {agent} owns no states"
                )));
            }
            for state in members {
                if !owned.insert(state.clone()) {
                    return Err(FeudalError::Configuration(format!(
                        "state {state} is owned by more than one agent"
                    )));
                }
            }
        }
        for state in env_states {
            if !owned.contains(state) {
                return Err(FeudalError::Configuration(format!(
                    "environment state {state} is not owned by any lowest-level agent"
                )));
            }
        }
        if owned.len() != env_states.len() {
            return Err(FeudalError::Configuration(format!(
                "lowest level owns {} states but the environment provides {}",
                owned.len(),
                env_states.len()
            )));
        }

        for index in 1..self.levels.len() {
            let lower: IndexSet<AgentId> = self.levels[index - 1].keys().cloned().collect();
            let mut covered = IndexSet::new();
            for (agent, members) in &self.levels[index] {
                if members.is_empty() {
                    return Err(FeudalError::Configuration(format!(
                        "agent {agent} owns no states"
                    )));
                }
                for member in members {
                    if !lower.contains(member) {
                        return Err(FeudalError::Configuration(format!(
                            "agent {agent} claims {member}, which is not an agent one level down"
                        )));
                    }
                    if !covered.insert(member.clone()) {
                        return Err(FeudalError::Configuration(format!(
                            "agent {member} has more than one parent"
                        )));
                    }
                }
            }
            if covered.len() != lower.len() {
                return Err(FeudalError::Configuration(format!(
                    "level {index} covers {} of {} lower agents",
                    covered.len(),
                    lower.len()
                )));
            }
        }

        let top = self.levels.last().map_or(0, IndexMap::len);
        if top != 1 {
            return Err(FeudalError::Configuration(format!(
                "the top level must hold exactly one agent, found {top}"
            )));
        }

        let known: IndexSet<AgentId> = self
            .levels
            .iter()
            .flat_map(|level| level.keys().cloned())
            .collect();
        for agent in self.exits.keys() {
            if !known.contains(agent) {
                return Err(FeudalError::Configuration(format!(
                    "exit table references unknown agent {agent}"
                )));
            }
        }

        Ok(())
    }

    /// Resolve a goal cell into its per-level goal chain: the cell itself,
    /// then the owning agent at each level upward.
    pub fn goal_chain(&self, goal: &StateId) -> Result<Vec<StateId>> {
        let mut chain = vec![goal.clone()];
        let mut target = goal.clone();
        for level in &self.levels {
            let owner = level
                .iter()
                .find(|(_, members)| members.contains(&target))
                .map(|(agent, _)| agent.clone());
            match owner {
                Some(owner) => {
                    chain.push(owner.clone());
                    target = owner;
                }
                None => {
                    return Err(FeudalError::Configuration(format!(
                        "goal {goal} lies outside the reachable hierarchy"
                    )));
                }
            }
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_spec() -> PartitionSpec {
        let mut lower = IndexMap::new();
        lower.insert(
            AgentId::from("A0"),
            vec![StateId::from("c0"), StateId::from("c1")],
        );
        lower.insert(
            AgentId::from("A1"),
            vec![StateId::from("c2"), StateId::from("c3")],
        );
        let mut upper = IndexMap::new();
        upper.insert(
            AgentId::from("SUP"),
            vec![AgentId::from("A0"), AgentId::from("A1")],
        );
        PartitionSpec {
            levels: vec![lower, upper],
            exits: IndexMap::new(),
        }
    }

    fn states(ids: &[&str]) -> Vec<StateId> {
        ids.iter().map(|id| StateId::from(*id)).collect()
    }

    #[test]
    fn a_well_formed_partition_validates() {
        let spec = two_level_spec();
        spec.validate(&states(&["c0", "c1", "c2", "c3"])).unwrap();
    }

    #[test]
    fn uncovered_environment_states_are_rejected() {
        let spec = two_level_spec();
        let err = spec
            .validate(&states(&["c0", "c1", "c2", "c3", "c4"]))
            .unwrap_err();
        assert!(matches!(err, FeudalError::Configuration(_)));
    }

    #[test]
    fn goal_chains_walk_the_levels_bottom_up() {
        let spec = two_level_spec();
        let chain = spec.goal_chain(&StateId::from("c2")).unwrap();
        assert_eq!(
            chain,
            states(&["c2", "A1", "SUP"])
        );
    }

    #[test]
    fn unknown_goals_are_a_configuration_error() {
        let spec = two_level_spec();
        assert!(matches!(
            spec.goal_chain(&StateId::from("c9")),
            Err(FeudalError::Configuration(_))
        ));
    }
}
