//! Append-only action and task registries
//!
//! Legal-action sets are state-dependent and grow at runtime as exits are
//! discovered, so both registries are explicit append-only structures:
//! registration is an operation, never a side effect of a lookup, and
//! iteration order is registration order (which makes greedy tie-breaking
//! deterministic).

use indexmap::{IndexMap, IndexSet};

use feudal_rl_core::{Action, FeudalError, Result, StateId, Task};

/// Per-state legal-action registry.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<StateId, Vec<Action>>,
}

impl ActionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a state with no actions yet.
    pub fn declare_state(&mut self, state: StateId) {
        self.actions.entry(state).or_default();
    }

    /// Register an action as legal in `state`. Returns `false` when the
    /// action was already registered (duplicate registration is a no-op).
    pub fn register(&mut self, state: &StateId, action: Action) -> bool {
        let entry = self.actions.entry(state.clone()).or_default();
        if entry.contains(&action) {
            false
        } else {
            entry.push(action);
            true
        }
    }

    /// Whether `action` is legal in `state`.
    #[must_use]
    pub fn is_registered(&self, state: &StateId, action: &Action) -> bool {
        self.actions
            .get(state)
            .is_some_and(|actions| actions.contains(action))
    }

    /// Legal actions of `state`, in registration order.
    ///
    /// Fails with a configuration error when the state was never declared;
    /// querying an unknown state is a wiring fault, not an empty result.
    pub fn legal(&self, state: &StateId) -> Result<&[Action]> {
        self.actions
            .get(state)
            .map(Vec::as_slice)
            .ok_or_else(|| FeudalError::Configuration(format!("no actions declared for state {state}")))
    }

    /// States known to the registry, in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &StateId> {
        self.actions.keys()
    }
}

/// Append-only registry of learnable `ExitTo` tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: IndexSet<Task>,
}

impl TaskRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns `false` when it was already present.
    ///
    /// Management pseudo-tasks never enter the registry; attempting to
    /// register one is a configuration fault.
    pub fn register(&mut self, task: Task) -> Result<bool> {
        if task.is_management() {
            return Err(FeudalError::Configuration(format!(
                "management task {task} cannot be registered"
            )));
        }
        Ok(self.tasks.insert(task))
    }

    /// Whether the task is registered.
    #[must_use]
    pub fn contains(&self, task: &Task) -> bool {
        self.tasks.contains(task)
    }

    /// Registered tasks, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been discovered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feudal_rl_core::Direction;

    #[test]
    fn registration_is_append_only_and_ordered() {
        let mut registry = ActionRegistry::new();
        let state = StateId::from("c0");
        assert!(registry.register(&state, Action::Primitive(Direction::North)));
        assert!(registry.register(&state, Action::ExitTo(StateId::from("A1"))));
        assert!(!registry.register(&state, Action::Primitive(Direction::North)));

        let legal = registry.legal(&state).unwrap();
        assert_eq!(legal.len(), 2);
        assert_eq!(legal[0], Action::Primitive(Direction::North));
    }

    #[test]
    fn undeclared_states_are_a_configuration_error() {
        let registry = ActionRegistry::new();
        let err = registry.legal(&StateId::from("nowhere")).unwrap_err();
        assert!(matches!(err, FeudalError::Configuration(_)));
    }

    #[test]
    fn management_tasks_are_rejected() {
        let mut tasks = TaskRegistry::new();
        assert!(tasks.register(Task::Explore).is_err());
        assert!(tasks.register(Task::ExitTo(StateId::from("A1"))).unwrap());
        assert!(!tasks.register(Task::ExitTo(StateId::from("A1"))).unwrap());
        assert_eq!(tasks.len(), 1);
    }
}
