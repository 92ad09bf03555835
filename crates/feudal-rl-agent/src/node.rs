//! The per-level agent: protocol state machine, learning and reporting
//!
//! A node owns one partition of its level's state space, the empirical
//! transition model and value tables over it, and reacts to exactly two
//! kinds of input: instructions from its parent and reports from below.
//! All mutation happens synchronously inside one message handler; outgoing
//! messages are buffered in three single-slot ports and drained in a fixed
//! priority order.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use feudal_rl_core::{
    Action, AgentId, Command, Direction, Episode, FeudalError, LearningConfig, Report, Result,
    SimTime, StateId, Task,
};

use crate::persistence::ModelSnapshot;
use crate::registry::{ActionRegistry, TaskRegistry};
use crate::selector::{self, Choice};
use crate::solver;
use crate::transition::{TransitionModel, TransitionStat};
use crate::value::{QTable, UtilityTable};

/// Where an outgoing message is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// To the parent (or the host, for the top node)
    Upper(Report),
    /// To the child owning the named state
    Child(StateId, Command),
    /// To the environment (lowest level only)
    Environment(Command),
}

/// Pending outbound messages, at most one per port.
#[derive(Debug, Default)]
struct Outbox {
    to_upper: Option<Report>,
    to_previous: Option<Command>,
    to_current: Option<Command>,
}

/// One decision-making node of the feudal hierarchy.
pub struct AgentNode {
    id: AgentId,
    states: Vec<StateId>,
    state_owner: HashMap<StateId, AgentId>,
    config: LearningConfig,
    is_top: bool,
    is_lowest: bool,

    actions: ActionRegistry,
    tasks: TaskRegistry,
    model: TransitionModel,
    q: QTable,
    utility: UtilityTable,

    task: Task,
    goals: Vec<StateId>,
    goal: Option<StateId>,
    previous_state: Option<StateId>,
    current_state: Option<StateId>,
    chosen: Option<Choice>,
    action_start: SimTime,
    warmup_done: bool,
    rng: StdRng,
    outbox: Outbox,

    episodes: Vec<Episode>,
    episode_start: SimTime,
    mean_episode_length: f64,
}

impl AgentNode {
    /// Build a node over its partition.
    ///
    /// `level_partition` maps every agent of this node's level to its member
    /// states; the whole level is needed to translate observed states into
    /// owning agents when reporting upward. Lowest-level nodes start with
    /// the primitive action set; upper levels discover their exit actions
    /// at runtime.
    pub fn new(
        id: AgentId,
        level_partition: &IndexMap<AgentId, Vec<StateId>>,
        config: LearningConfig,
        is_top: bool,
        is_lowest: bool,
    ) -> Result<Self> {
        let states = level_partition.get(&id).cloned().ok_or_else(|| {
            FeudalError::Configuration(format!("agent {id} does not appear in its level partition"))
        })?;
        if states.is_empty() {
            return Err(FeudalError::Configuration(format!(
                "agent {id} owns no states"
            )));
        }

        let mut state_owner = HashMap::new();
        for (agent, members) in level_partition {
            for state in members {
                state_owner.insert(state.clone(), agent.clone());
            }
        }

        let mut actions = ActionRegistry::new();
        for state in &states {
            actions.declare_state(state.clone());
            if is_lowest {
                for direction in Direction::ALL {
                    actions.register(state, Action::Primitive(direction));
                }
            }
        }

        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let warmup_done = config.warmup == 0;

        let mut node = Self {
            id,
            states,
            state_owner,
            config,
            is_top,
            is_lowest,
            actions,
            tasks: TaskRegistry::new(),
            model: TransitionModel::new(),
            q: QTable::new(),
            utility: UtilityTable::new(),
            task: Task::Idle,
            goals: Vec::new(),
            goal: None,
            previous_state: None,
            current_state: None,
            chosen: None,
            action_start: 0,
            warmup_done,
            rng,
            outbox: Outbox::default(),
            episodes: Vec::new(),
            episode_start: 0,
            mean_episode_length: 0.0,
        };

        if is_top {
            // The top node drives itself: it opens with an episode reset.
            node.task = Task::NewEpisode;
            node.outbox.to_current = Some(Command::NewEpisode);
        }
        Ok(node)
    }

    /// Install the goal chain (lowest-level goal first). Only the top node
    /// resolves a goal on its own; every other node receives goals with its
    /// task assignments.
    pub fn set_goal(&mut self, goals: Vec<StateId>) {
        if self.is_top {
            self.goals = goals;
            self.compute_goal();
        }
    }

    /// Handle an instruction from the parent (or the host, for the top
    /// node).
    pub fn handle_upper_message(&mut self, command: &Command, now: SimTime) -> Result<()> {
        match command {
            Command::NewEpisode => {
                self.task = Task::NewEpisode;
                self.current_state = None;
                self.chosen = None;
                self.outbox.to_current = Some(Command::NewEpisode);
            }

            Command::Idle { state } => {
                // A sibling took over: close out the in-flight action. The
                // notified state is expressed in an ancestor's vocabulary,
                // which is exactly how exits get recorded.
                if self.in_flight() {
                    let cost = now.saturating_sub(self.action_start);
                    self.finish_action(state, cost)?;
                    self.previous_state = self.current_state.take();
                }
                self.task = Task::Idle;
                if self.previous_state.is_some() && !self.is_lowest {
                    self.outbox.to_previous = Some(Command::Idle {
                        state: state.clone(),
                    });
                }
            }

            Command::Assign { task, goals } => {
                if matches!(task, Task::Idle | Task::NewEpisode) {
                    return Err(FeudalError::Protocol(format!(
                        "task {task} cannot be assigned explicitly"
                    )));
                }
                self.task = task.clone();
                self.goals = goals.clone();
                if matches!(task, Task::FindGoal) {
                    self.compute_goal();
                    self.recompute_strategy()?;
                }
                self.action_start = now;
                self.select_and_dispatch(now)?;
            }

            Command::Act { .. } => {
                return Err(FeudalError::Protocol(format!(
                    "primitive action sent to agent {}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Handle a report from a child agent or from the environment.
    pub fn handle_lower_message(&mut self, report: &Report, now: SimTime) -> Result<()> {
        let (new_state, goal_found) = match report {
            Report::Observation {
                state,
                goal_reached,
                ..
            } => {
                let own_goal = self.goal.as_ref() == Some(state);
                (state.clone(), *goal_reached || own_goal)
            }
            Report::Agent { state, goal_found } => (state.clone(), *goal_found),
        };

        if self.in_flight() && self.current_state.is_some() {
            let cost = now.saturating_sub(self.action_start);
            self.finish_action(&new_state, cost)?;
        }

        // A different state means a different child is now active: idle the
        // previous one before instructing anyone else.
        if self.current_state.as_ref() != Some(&new_state)
            && self.current_state.is_some()
            && !self.is_lowest
        {
            self.previous_state = self.current_state.clone();
            self.outbox.to_previous = Some(Command::Idle {
                state: new_state.clone(),
            });
        }
        self.current_state = Some(new_state.clone());

        if goal_found {
            if self.is_top {
                self.complete_episode(now);
                self.task = Task::NewEpisode;
                self.current_state = None;
                self.outbox.to_current = Some(Command::NewEpisode);
            } else {
                self.current_state = None;
                self.task = Task::Idle;
                self.outbox.to_upper = Some(Report::Agent {
                    state: self.owner_of(&new_state)?,
                    goal_found: true,
                });
            }
        } else if matches!(self.task, Task::Idle | Task::NewEpisode) {
            if self.is_top {
                self.begin_episode(&new_state, now);
                self.task = Task::FindGoal;
                self.compute_goal();
                self.recompute_strategy()?;
                self.select_and_dispatch(now)?;
            } else {
                self.outbox.to_upper = Some(Report::Agent {
                    state: self.owner_of(&new_state)?,
                    goal_found: false,
                });
            }
        } else if self.is_top
            && !self.warmup_elapsed(now)
            && now.saturating_sub(self.episode_start) > self.exploration_cap()
        {
            // Warm-up episodes that drag on teach little; cut them short.
            self.abort_episode(now);
            self.task = Task::NewEpisode;
            self.current_state = None;
            self.outbox.to_current = Some(Command::NewEpisode);
        } else {
            self.select_and_dispatch(now)?;
        }

        self.action_start = now;
        Ok(())
    }

    /// Drain one pending message: upper first, then the deactivation notice,
    /// then the instruction to the active lower agent or the environment.
    /// Call repeatedly until `None`; each slot is consumed exactly once.
    pub fn emit_message(&mut self) -> Option<Outgoing> {
        if let Some(report) = self.outbox.to_upper.take() {
            return Some(Outgoing::Upper(report));
        }
        if let Some(command) = self.outbox.to_previous.take() {
            if let Some(previous) = self.previous_state.clone() {
                return Some(Outgoing::Child(previous, command));
            }
        }
        if let Some(command) = self.outbox.to_current.take() {
            if self.is_lowest {
                return Some(Outgoing::Environment(command));
            }
            // With no active child yet, resets walk down the first branch.
            let target = self
                .current_state
                .clone()
                .unwrap_or_else(|| self.states[0].clone());
            return Some(Outgoing::Child(target, command));
        }
        None
    }

    /// Whether an action is currently awaiting its outcome.
    fn in_flight(&self) -> bool {
        !matches!(self.task, Task::Idle | Task::NewEpisode)
            && !matches!(self.chosen, Some(Choice::DelegateFindGoal))
    }

    /// Close out the in-flight action with its observed outcome: record the
    /// transition for learnable actions, lazily discover exit tasks and
    /// actions, and apply the online Q update.
    fn finish_action(&mut self, new_state: &StateId, cost: u64) -> Result<()> {
        let Some(current) = self.current_state.clone() else {
            return Ok(());
        };
        let learnable = match &self.chosen {
            Some(Choice::Learnable(action)) => Some(action.clone()),
            _ => None,
        };

        if let Some(action) = &learnable {
            self.model
                .record(&self.actions, &current, action, new_state, cost)?;
        }

        // A transition leaving the partition reveals an exit task.
        if !self.states.contains(new_state) {
            let task = Task::ExitTo(new_state.clone());
            if !self.tasks.contains(&task) {
                self.tasks.register(task.clone())?;
                self.q
                    .seed_task(new_state, &self.actions, self.config.optimistic_q());
                debug!(agent = %self.id, task = %task, "discovered exit task");
            }
        }

        // Above the lowest level the observed exit also becomes a
        // delegation action of the state it was seen from, seeded with the
        // sample that revealed it.
        if new_state != &current && !self.is_lowest {
            let action = Action::ExitTo(new_state.clone());
            if !self.actions.is_registered(&current, &action) {
                self.actions.register(&current, action.clone());
                self.q
                    .seed_action(&self.tasks, &current, &action, self.config.optimistic_q());
                self.model
                    .record(&self.actions, &current, &action, new_state, cost)?;
                debug!(agent = %self.id, state = %current, action = %action, "discovered exit action");
                if self.goal.is_some() {
                    self.recompute_strategy()?;
                }
            }
        }

        if let Some(action) = &learnable {
            let next_actions = if self.states.contains(new_state) {
                Some(self.actions.legal(new_state)?.to_vec())
            } else {
                None
            };
            let samples = self.model.sample_count(&current, action);
            self.q.learn(
                &self.tasks,
                &self.config,
                samples,
                &current,
                action,
                new_state,
                next_actions.as_deref(),
                cost,
            );
        }
        Ok(())
    }

    /// Select the next action for the current task and queue the outgoing
    /// instruction, or report completion when nothing remains to do.
    fn select_and_dispatch(&mut self, now: SimTime) -> Result<()> {
        let state = self.current_state.clone().ok_or_else(|| {
            FeudalError::Protocol(format!(
                "agent {} cannot select an action without a current state",
                self.id
            ))
        })?;
        let in_warmup = !self.warmup_elapsed(now);
        let choice = selector::select(
            &mut self.rng,
            &self.task,
            self.goal.as_ref(),
            &state,
            &self.actions,
            &self.q,
            &self.utility,
            self.is_lowest,
            in_warmup,
        )?;

        match &choice {
            Choice::Idle => {
                if self.is_top {
                    // Single-node hierarchy standing on its goal: restart.
                    self.task = Task::NewEpisode;
                    self.current_state = None;
                    self.chosen = None;
                    self.outbox.to_current = Some(Command::NewEpisode);
                    return Ok(());
                }
                self.task = Task::Idle;
                self.outbox.to_upper = Some(Report::Agent {
                    state: self.owner_of(&state)?,
                    goal_found: true,
                });
            }
            Choice::Learnable(action) => {
                let command = match action {
                    Action::Primitive(direction) => Command::Act {
                        direction: *direction,
                    },
                    Action::ExitTo(target) => Command::Assign {
                        task: Task::ExitTo(target.clone()),
                        goals: self.goals.clone(),
                    },
                };
                self.outbox.to_current = Some(command);
            }
            Choice::DelegateExplore => {
                self.outbox.to_current = Some(Command::Assign {
                    task: Task::Explore,
                    goals: self.goals.clone(),
                });
            }
            Choice::DelegateFindGoal => {
                self.outbox.to_current = Some(Command::Assign {
                    task: Task::FindGoal,
                    goals: self.goals.clone(),
                });
            }
        }
        self.chosen = Some(choice);
        Ok(())
    }

    /// Resolve this level's goal from the goal chain.
    fn compute_goal(&mut self) {
        self.goal = self
            .goals
            .iter()
            .find(|goal| self.states.contains(goal))
            .cloned();
    }

    /// Recompute the utility table for the active goal.
    fn recompute_strategy(&mut self) -> Result<()> {
        let Some(goal) = self.goal.clone() else {
            self.utility = UtilityTable::new();
            return Ok(());
        };
        let solution = solver::value_iteration(
            &self.model,
            &self.actions,
            &self.states,
            &goal,
            &self.config,
        )?;
        debug!(
            agent = %self.id,
            goal = %goal,
            iterations = solution.iterations,
            converged = solution.converged,
            "recomputed strategy"
        );
        self.utility = solution.utilities;
        Ok(())
    }

    fn owner_of(&self, state: &StateId) -> Result<AgentId> {
        self.state_owner.get(state).cloned().ok_or_else(|| {
            FeudalError::Configuration(format!(
                "state {state} has no owning agent at the level of {}",
                self.id
            ))
        })
    }

    fn warmup_elapsed(&self, now: SimTime) -> bool {
        self.warmup_done || now > self.config.warmup
    }

    fn exploration_cap(&self) -> u64 {
        self.config.exploration_episode_factor * self.states.len() as u64
    }

    fn begin_episode(&mut self, start: &StateId, now: SimTime) {
        self.episode_start = now;
        self.episodes.push(Episode::begin(Some(start.clone()), now));
        debug!(agent = %self.id, state = %start, time = now, "episode started");
    }

    #[allow(clippy::cast_precision_loss)]
    fn complete_episode(&mut self, now: SimTime) {
        let length = now.saturating_sub(self.episode_start);
        // The running mean only tracks post-warm-up episodes.
        if self.warmup_done || self.episode_start > self.config.warmup {
            if self.mean_episode_length == 0.0 {
                self.mean_episode_length = length as f64;
            } else {
                self.mean_episode_length += 0.02 * (length as f64 - self.mean_episode_length);
            }
        }
        let mean = self.mean_episode_length;
        match self.episodes.last_mut() {
            Some(episode) if episode.length.is_none() => episode.complete(length, mean, false),
            _ => {
                // The reset itself landed on the goal: record a degenerate
                // episode so the count stays honest.
                let mut episode = Episode::begin(self.current_state.clone(), self.episode_start);
                episode.complete(length, mean, false);
                self.episodes.push(episode);
            }
        }
        info!(agent = %self.id, length, mean, "episode completed");
        self.episode_start = now;
    }

    fn abort_episode(&mut self, now: SimTime) {
        let length = now.saturating_sub(self.episode_start);
        if let Some(episode) = self.episodes.last_mut() {
            if episode.length.is_none() {
                episode.complete(length, 0.0, true);
            }
        }
        debug!(agent = %self.id, length, "episode cut short during warm-up");
        self.episode_start = now;
    }

    /// Greedy policy over the current utility table, one entry per state.
    /// `None` marks states where no explored action stands out.
    pub fn goal_policy(&self) -> Result<Vec<(StateId, Option<Action>)>> {
        self.states
            .iter()
            .map(|state| {
                let best =
                    selector::best_action(&self.actions, state, |action| {
                        self.utility.get(state, action)
                    })?;
                Ok((state.clone(), best))
            })
            .collect()
    }

    /// Greedy policy over `Q[ExitTo(target)]`, one entry per state.
    pub fn task_policy(&self, target: &StateId) -> Result<Vec<(StateId, Option<Action>)>> {
        self.states
            .iter()
            .map(|state| {
                let best = selector::best_action(&self.actions, state, |action| {
                    self.q.get(target, state, action)
                })?;
                Ok((state.clone(), best))
            })
            .collect()
    }

    /// Capture the learned tables for persistence.
    #[must_use]
    pub fn snapshot(&self) -> ModelSnapshot {
        let mut actions = IndexMap::new();
        let mut destination_states = IndexMap::new();
        let mut nb_sample = IndexMap::new();
        let mut nb_transition = IndexMap::new();
        let mut cumul_transition_cost = IndexMap::new();

        for state in self.actions.states() {
            let Ok(legal) = self.actions.legal(state) else {
                continue;
            };
            actions.insert(state.clone(), legal.to_vec());

            let mut destinations_here = IndexMap::new();
            let mut samples_here = IndexMap::new();
            let mut transitions_here = IndexMap::new();
            let mut costs_here = IndexMap::new();
            for action in legal {
                samples_here.insert(action.clone(), self.model.sample_count(state, action));
                let mut seen = Vec::new();
                let mut counts = IndexMap::new();
                let mut costs = IndexMap::new();
                for (destination, stat) in self.model.destinations(state, action) {
                    seen.push(destination.clone());
                    counts.insert(destination.clone(), stat.count);
                    costs.insert(destination.clone(), stat.cumulative_cost);
                }
                destinations_here.insert(action.clone(), seen);
                transitions_here.insert(action.clone(), counts);
                costs_here.insert(action.clone(), costs);
            }
            destination_states.insert(state.clone(), destinations_here);
            nb_sample.insert(state.clone(), samples_here);
            nb_transition.insert(state.clone(), transitions_here);
            cumul_transition_cost.insert(state.clone(), costs_here);
        }

        let mut q_value = IndexMap::new();
        for task in self.tasks.iter() {
            let Some(target) = task.terminal_state() else {
                continue;
            };
            let mut per_state = IndexMap::new();
            for state in self.actions.states() {
                let Ok(legal) = self.actions.legal(state) else {
                    continue;
                };
                let mut per_action = IndexMap::new();
                for action in legal {
                    let value = self
                        .q
                        .get(target, state, action)
                        .unwrap_or_else(|| self.config.optimistic_q());
                    per_action.insert(action.clone(), value);
                }
                per_state.insert(state.clone(), per_action);
            }
            q_value.insert(task.clone(), per_state);
        }

        ModelSnapshot {
            version: ModelSnapshot::VERSION,
            tasks: self.tasks.iter().cloned().collect(),
            actions,
            destination_states,
            nb_sample,
            nb_transition,
            cumul_transition_cost,
            q_value,
        }
    }

    /// Restore learned tables from a snapshot.
    ///
    /// Tables are rebuilt verbatim and the exploration warm-up is treated
    /// as already satisfied. Corrupted counts surface as configuration
    /// errors rather than silently producing an agent that cannot learn.
    pub fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<()> {
        let mut actions = ActionRegistry::new();
        for state in &self.states {
            actions.declare_state(state.clone());
        }
        for (state, legal) in &snapshot.actions {
            if !self.states.contains(state) {
                return Err(FeudalError::Configuration(format!(
                    "persisted state {state} does not belong to agent {}",
                    self.id
                )));
            }
            for action in legal {
                actions.register(state, action.clone());
            }
        }

        let mut tasks = TaskRegistry::new();
        for task in &snapshot.tasks {
            tasks.register(task.clone())?;
        }

        let mut model = TransitionModel::new();
        for (state, per_action) in &snapshot.nb_sample {
            for (action, &samples) in per_action {
                let empty = IndexMap::new();
                let counts = snapshot
                    .nb_transition
                    .get(state)
                    .and_then(|by_action| by_action.get(action))
                    .unwrap_or(&empty);
                let costs = snapshot
                    .cumul_transition_cost
                    .get(state)
                    .and_then(|by_action| by_action.get(action));
                let order = snapshot
                    .destination_states
                    .get(state)
                    .and_then(|by_action| by_action.get(action));

                let mut stats = IndexMap::new();
                if let Some(order) = order {
                    for destination in order {
                        let count = counts.get(destination).copied().unwrap_or(0);
                        let cumulative_cost = costs
                            .and_then(|costs| costs.get(destination))
                            .copied()
                            .unwrap_or(0);
                        stats.insert(
                            destination.clone(),
                            TransitionStat {
                                count,
                                cumulative_cost,
                            },
                        );
                    }
                }
                model.restore(state.clone(), action.clone(), samples, stats)?;
            }
        }

        let mut q = QTable::new();
        for (task, per_state) in &snapshot.q_value {
            let Some(target) = task.terminal_state() else {
                return Err(FeudalError::Configuration(format!(
                    "persisted Q table keyed by management task {task}"
                )));
            };
            for (state, per_action) in per_state {
                for (action, &value) in per_action {
                    q.set(target.clone(), state.clone(), action.clone(), value);
                }
            }
        }

        self.actions = actions;
        self.tasks = tasks;
        self.model = model;
        self.q = q;
        self.warmup_done = true;
        info!(agent = %self.id, tasks = self.tasks.len(), "model restored");
        Ok(())
    }

    /// Agent id
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// States owned by this node, in partition order
    #[must_use]
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    /// Current task
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Goal resolved for this level, if any
    #[must_use]
    pub fn goal(&self) -> Option<&StateId> {
        self.goal.as_ref()
    }

    /// Currently active state (or child), if any
    #[must_use]
    pub fn current_state(&self) -> Option<&StateId> {
        self.current_state.as_ref()
    }

    /// The empirical transition model
    #[must_use]
    pub fn model(&self) -> &TransitionModel {
        &self.model
    }

    /// The action registry
    #[must_use]
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// The discovered exit tasks
    #[must_use]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// The Q table
    #[must_use]
    pub fn q_table(&self) -> &QTable {
        &self.q
    }

    /// The utility table of the active goal
    #[must_use]
    pub fn utility(&self) -> &UtilityTable {
        &self.utility
    }

    /// Episode records (top-level nodes only)
    #[must_use]
    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    /// Running mean episode length
    #[must_use]
    pub fn mean_episode_length(&self) -> f64 {
        self.mean_episode_length
    }

    /// Whether the exploration warm-up is satisfied
    #[must_use]
    pub fn warmup_satisfied(&self) -> bool {
        self.warmup_done
    }

    /// Whether this node sits at the top of the tree
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.is_top
    }

    /// Whether this node talks directly to the environment
    #[must_use]
    pub fn is_lowest_level(&self) -> bool {
        self.is_lowest
    }
}
