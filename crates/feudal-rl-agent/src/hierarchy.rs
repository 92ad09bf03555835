//! Building and driving the agent tree
//!
//! The coordinator is purely structural: it validates the partition,
//! builds nodes bottom-up, wires parent/child routes and the environment,
//! and ferries messages one at a time. It performs no learning and holds
//! no per-episode state beyond the undelivered message queue.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use feudal_rl_core::{
    AgentId, Command, Environment, Episode, FeudalError, LearningConfig, PartitionSpec, Report,
    Result, SimTime, StateId,
};

use crate::node::{AgentNode, Outgoing};
use crate::persistence::ModelSnapshot;

#[derive(Debug)]
enum Delivery {
    Command { target: AgentId, command: Command },
    Report { target: AgentId, report: Report },
    Env { command: Command },
}

/// The wired tree of agents over an environment.
pub struct Hierarchy<E: Environment> {
    nodes: IndexMap<AgentId, AgentNode>,
    parent: HashMap<AgentId, AgentId>,
    cell_owner: HashMap<StateId, AgentId>,
    top: AgentId,
    env: E,
    now: SimTime,
    pending: VecDeque<Delivery>,
}

impl<E: Environment> Hierarchy<E> {
    /// Build the tree bottom-up over `spec`, wiring the lowest level to the
    /// environment.
    ///
    /// Each node receives the shared configuration with its level's reward
    /// scale and its own seed stream. An optional goal cell is resolved into
    /// the per-level goal chain and installed on the top node.
    pub fn build(
        spec: PartitionSpec,
        env: E,
        config: &LearningConfig,
        goal: Option<StateId>,
    ) -> Result<Self> {
        let env_states = env.states();
        spec.validate(&env_states)?;

        let level_count = spec.levels.len();
        let mut nodes = IndexMap::new();
        let mut reward_max = config.reward_max;
        let mut seed_offset = 0u64;

        for (level_index, level) in spec.levels.iter().enumerate() {
            let is_lowest = level_index == 0;
            let is_top = level_index == level_count - 1;
            for agent_id in level.keys() {
                let mut node_config = config.clone();
                node_config.reward_max = reward_max;
                if let Some(seed) = config.seed {
                    node_config.seed = Some(seed.wrapping_add(seed_offset));
                }
                seed_offset += 1;
                let node =
                    AgentNode::new(agent_id.clone(), level, node_config, is_top, is_lowest)?;
                nodes.insert(agent_id.clone(), node);
            }
            // Rewards scale with the number of partitions per level, so an
            // exit one level up is worth a whole lower-level traversal.
            #[allow(clippy::cast_precision_loss)]
            {
                reward_max *= level.len() as f64;
            }
        }

        let mut parent = HashMap::new();
        for level in spec.levels.iter().skip(1) {
            for (parent_id, members) in level {
                for member in members {
                    parent.insert(member.clone(), parent_id.clone());
                }
            }
        }

        let mut cell_owner = HashMap::new();
        for (agent_id, members) in &spec.levels[0] {
            for state in members {
                cell_owner.insert(state.clone(), agent_id.clone());
            }
        }

        let top = spec
            .levels
            .last()
            .and_then(|level| level.keys().next())
            .cloned()
            .ok_or_else(|| FeudalError::Configuration("partition has no top agent".into()))?;

        let mut hierarchy = Self {
            nodes,
            parent,
            cell_owner,
            top: top.clone(),
            env,
            now: 0,
            pending: VecDeque::new(),
        };

        if let Some(goal_cell) = goal {
            let chain = spec.goal_chain(&goal_cell)?;
            if let Some(node) = hierarchy.nodes.get_mut(&top) {
                node.set_goal(chain);
            }
        }

        // The top node opens with an episode reset.
        hierarchy.drain_outbox(&top)?;
        Ok(hierarchy)
    }

    /// Deliver pending messages until the simulated clock reaches `until`
    /// or the hierarchy quiesces.
    pub async fn run_until(&mut self, until: SimTime) -> Result<()> {
        self.pump(until, None).await
    }

    /// Deliver pending messages until `episodes` further episodes complete,
    /// bounded by `max_time`.
    pub async fn run_episodes(&mut self, episodes: usize, max_time: SimTime) -> Result<()> {
        let target = self.completed_episodes() + episodes;
        self.pump(max_time, Some(target)).await
    }

    async fn pump(&mut self, until: SimTime, episode_target: Option<usize>) -> Result<()> {
        loop {
            if self.now >= until {
                break;
            }
            if let Some(target) = episode_target {
                if self.completed_episodes() >= target {
                    break;
                }
            }
            let Some(delivery) = self.pending.pop_front() else {
                debug!("hierarchy quiescent, no pending messages");
                break;
            };
            match delivery {
                Delivery::Command { target, command } => {
                    let now = self.now;
                    self.node_mut(&target)?.handle_upper_message(&command, now)?;
                    self.drain_outbox(&target)?;
                }
                Delivery::Report { target, report } => {
                    let now = self.now;
                    self.node_mut(&target)?.handle_lower_message(&report, now)?;
                    self.drain_outbox(&target)?;
                }
                Delivery::Env { command } => {
                    let step = match command {
                        Command::NewEpisode => Some(self.env.reset().await?),
                        Command::Act { direction } => Some(self.env.apply(direction).await?),
                        // The environment ignores idling.
                        Command::Idle { .. } => None,
                        Command::Assign { task, .. } => {
                            return Err(FeudalError::Protocol(format!(
                                "task {task} assigned to the environment"
                            )));
                        }
                    };
                    if let Some(step) = step {
                        self.now += step.cost;
                        let owner = self.cell_owner.get(&step.state).cloned().ok_or_else(|| {
                            FeudalError::Configuration(format!(
                                "cell {} has no owning agent",
                                step.state
                            ))
                        })?;
                        self.pending.push_back(Delivery::Report {
                            target: owner,
                            report: Report::Observation {
                                state: step.state,
                                cost: step.cost,
                                goal_reached: step.goal_reached,
                            },
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn drain_outbox(&mut self, id: &AgentId) -> Result<()> {
        loop {
            let node = self.node_mut(id)?;
            let Some(outgoing) = node.emit_message() else {
                break;
            };
            match outgoing {
                Outgoing::Upper(report) => {
                    if let Some(parent) = self.parent.get(id) {
                        self.pending.push_back(Delivery::Report {
                            target: parent.clone(),
                            report,
                        });
                    } else {
                        debug!(agent = %id, "top-level report absorbed by the host");
                    }
                }
                Outgoing::Child(child, command) => {
                    self.pending.push_back(Delivery::Command {
                        target: child,
                        command,
                    });
                }
                Outgoing::Environment(command) => {
                    self.pending.push_back(Delivery::Env { command });
                }
            }
        }
        Ok(())
    }

    fn node_mut(&mut self, id: &AgentId) -> Result<&mut AgentNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| FeudalError::Configuration(format!("unknown agent {id}")))
    }

    /// Number of completed episodes so far.
    #[must_use]
    pub fn completed_episodes(&self) -> usize {
        self.nodes.get(&self.top).map_or(0, |node| {
            node.episodes()
                .iter()
                .filter(|episode| episode.length.is_some())
                .count()
        })
    }

    /// Episode records of the top node.
    #[must_use]
    pub fn episodes(&self) -> &[Episode] {
        self.nodes
            .get(&self.top)
            .map_or(&[], AgentNode::episodes)
    }

    /// Current simulated time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Borrow a node by agent id.
    pub fn node(&self, id: &AgentId) -> Result<&AgentNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| FeudalError::Configuration(format!("unknown agent {id}")))
    }

    /// Borrow the top node.
    pub fn top(&self) -> Result<&AgentNode> {
        self.node(&self.top)
    }

    /// Borrow the environment.
    #[must_use]
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Save every node's learned model under `dir`, one
    /// `<prefix>_<agent>.json` file per agent, overwriting previous files.
    pub async fn save_models(&self, dir: &Path, prefix: &str) -> Result<()> {
        for (id, node) in &self.nodes {
            let path = dir.join(format!("{prefix}_{id}.json"));
            node.snapshot().save(&path).await?;
        }
        Ok(())
    }

    /// Restore every node's learned model from `dir`. Missing files are
    /// recoverable: the node keeps its fresh tables.
    pub async fn load_models(&mut self, dir: &Path, prefix: &str) -> Result<()> {
        let ids: Vec<AgentId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let path = dir.join(format!("{prefix}_{id}.json"));
            if let Some(snapshot) = ModelSnapshot::load(&path).await? {
                self.node_mut(&id)?.restore(&snapshot)?;
            }
        }
        Ok(())
    }
}
