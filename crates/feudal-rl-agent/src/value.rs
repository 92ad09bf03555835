//! Q and utility tables

use std::collections::HashMap;

use feudal_rl_core::{Action, LearningConfig, StateId};

use crate::registry::{ActionRegistry, TaskRegistry};
use crate::transition::StateAction;

/// Key of one Q entry: a learnable task evaluated at a (state, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QKey {
    /// Terminal (external) state of the task
    pub target: StateId,
    /// Origin state
    pub state: StateId,
    /// Action applied
    pub action: Action,
}

/// Table of Q(task, state, action) values.
///
/// Entries are seeded when tasks or actions are registered, optimistically
/// initialized so unexplored pairs stay attractive, and updated online with
/// the semi-Markov Q-learning rule.
#[derive(Debug, Clone, Default)]
pub struct QTable {
    values: HashMap<QKey, f64>,
}

impl QTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(target: &StateId, state: &StateId, action: &Action) -> QKey {
        QKey {
            target: target.clone(),
            state: state.clone(),
            action: action.clone(),
        }
    }

    /// Value of an entry; `None` when the key was never seeded.
    #[must_use]
    pub fn get(&self, target: &StateId, state: &StateId, action: &Action) -> Option<f64> {
        self.values.get(&Self::key(target, state, action)).copied()
    }

    /// Seed or overwrite an entry.
    pub fn set(&mut self, target: StateId, state: StateId, action: Action, value: f64) {
        self.values.insert(
            QKey {
                target,
                state,
                action,
            },
            value,
        );
    }

    /// Seed entries for a newly discovered task over every registered
    /// (state, action) pair, leaving already-present entries untouched.
    pub fn seed_task(&mut self, target: &StateId, registry: &ActionRegistry, value: f64) {
        for state in registry.states() {
            if let Ok(actions) = registry.legal(state) {
                for action in actions {
                    self.values
                        .entry(Self::key(target, state, action))
                        .or_insert(value);
                }
            }
        }
    }

    /// Seed entries for a newly discovered action across all known tasks.
    pub fn seed_action(
        &mut self,
        tasks: &TaskRegistry,
        state: &StateId,
        action: &Action,
        value: f64,
    ) {
        for task in tasks.iter() {
            if let Some(target) = task.terminal_state() {
                self.values
                    .entry(Self::key(target, state, action))
                    .or_insert(value);
            }
        }
    }

    /// Best value over `actions` at `state` for a task. Unexplored but
    /// seeded entries participate (optimistic initialization is the
    /// exploration bonus); the floor is 0.
    #[must_use]
    pub fn best_value(&self, target: &StateId, state: &StateId, actions: &[Action]) -> f64 {
        actions
            .iter()
            .filter_map(|action| self.get(target, state, action))
            .fold(0.0, f64::max)
    }

    /// Apply the semi-Markov Q-learning update for one completed transition,
    /// for every registered task.
    ///
    /// `next_actions` carries the legal actions of `new_state` when it lies
    /// inside the partition, `None` when it is an external destination.
    /// `samples` is the pair's sample count after recording the transition;
    /// it drives the visit-decaying learning rate.
    #[allow(clippy::cast_precision_loss)]
    pub fn learn(
        &mut self,
        tasks: &TaskRegistry,
        config: &LearningConfig,
        samples: u64,
        state: &StateId,
        action: &Action,
        new_state: &StateId,
        next_actions: Option<&[Action]>,
        cost: u64,
    ) {
        let alpha = config.learning_rate.alpha(samples);
        for task in tasks.iter() {
            let Some(target) = task.terminal_state() else {
                continue;
            };
            let key = Self::key(target, state, action);
            if new_state == target {
                // Terminal reward realized exactly.
                self.values.insert(key, config.reward_max);
                continue;
            }
            let next_value = match next_actions {
                Some(actions) => self.best_value(target, new_state, actions),
                None => 0.0,
            };
            let reward = -config.penalty * cost as f64;
            let td_target = reward + config.gamma.powf(cost as f64) * next_value;
            let entry = self.values.entry(key).or_insert_with(|| config.optimistic_q());
            *entry += alpha * (td_target - *entry);
        }
    }

}

/// Utility table for the active goal, produced by value iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtilityTable {
    values: HashMap<StateAction, f64>,
}

impl UtilityTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Utility of a pair; `None` when value iteration never produced it.
    #[must_use]
    pub fn get(&self, state: &StateId, action: &Action) -> Option<f64> {
        self.values
            .get(&StateAction::new(state.clone(), action.clone()))
            .copied()
    }

    /// Store a pair's utility.
    pub fn set(&mut self, state: StateId, action: Action, value: f64) {
        self.values.insert(StateAction::new(state, action), value);
    }

    /// Number of stored pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
