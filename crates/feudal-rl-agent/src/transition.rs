//! Empirical transition and cost model

use indexmap::IndexMap;
use std::collections::HashMap;

use feudal_rl_core::{Action, FeudalError, Result, StateId};

use crate::registry::ActionRegistry;

/// Composite key of a (state, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateAction {
    /// Origin state
    pub state: StateId,
    /// Action applied
    pub action: Action,
}

impl StateAction {
    /// Build a key
    #[must_use]
    pub fn new(state: StateId, action: Action) -> Self {
        Self { state, action }
    }
}

/// Per-destination statistics of a (state, action) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionStat {
    /// Number of observed transitions to this destination
    pub count: u64,
    /// Total cost accumulated over those transitions
    pub cumulative_cost: u64,
}

/// Empirical transition model of one agent.
///
/// Tracks, for every legal (state, action) pair, how many times it was
/// applied and where it led at what cost. Destinations are kept in
/// first-observed order. Entries grow lazily and are never pruned.
#[derive(Debug, Clone, Default)]
pub struct TransitionModel {
    samples: HashMap<StateAction, u64>,
    destinations: HashMap<StateAction, IndexMap<StateId, TransitionStat>>,
}

impl TransitionModel {
    /// Create an empty model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(state: &StateId, action: &Action) -> StateAction {
        StateAction::new(state.clone(), action.clone())
    }

    /// Record one completed transition.
    ///
    /// The (state, action) pair must be legal per `registry`; recording
    /// through an unregistered pair indicates broken legality bookkeeping
    /// and fails with a configuration error.
    pub fn record(
        &mut self,
        registry: &ActionRegistry,
        state: &StateId,
        action: &Action,
        destination: &StateId,
        cost: u64,
    ) -> Result<()> {
        if !registry.is_registered(state, action) {
            return Err(FeudalError::Configuration(format!(
                "action {action} is not legal in state {state}"
            )));
        }
        let key = Self::key(state, action);
        *self.samples.entry(key.clone()).or_insert(0) += 1;
        let stat = self
            .destinations
            .entry(key)
            .or_default()
            .entry(destination.clone())
            .or_default();
        stat.count += 1;
        stat.cumulative_cost += cost;
        Ok(())
    }

    /// Number of samples collected for a pair (0 if never observed).
    #[must_use]
    pub fn sample_count(&self, state: &StateId, action: &Action) -> u64 {
        self.samples
            .get(&Self::key(state, action))
            .copied()
            .unwrap_or(0)
    }

    /// Empirical `P(destination | state, action)`.
    ///
    /// Callers must guard with `sample_count > 0`; a query on a pair with
    /// zero samples is a logic error and fails with `DivisionUndefined`.
    #[allow(clippy::cast_precision_loss)]
    pub fn probability(
        &self,
        state: &StateId,
        action: &Action,
        destination: &StateId,
    ) -> Result<f64> {
        let samples = self.sample_count(state, action);
        if samples == 0 {
            return Err(FeudalError::DivisionUndefined(format!("{state}/{action}")));
        }
        let count = self
            .destinations
            .get(&Self::key(state, action))
            .and_then(|stats| stats.get(destination))
            .map_or(0, |stat| stat.count);
        Ok(count as f64 / samples as f64)
    }

    /// Mean observed cost of reaching `destination` from the pair.
    ///
    /// Fails with `DivisionUndefined` when the triple was never observed.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_cost(&self, state: &StateId, action: &Action, destination: &StateId) -> Result<f64> {
        match self
            .destinations
            .get(&Self::key(state, action))
            .and_then(|stats| stats.get(destination))
        {
            Some(stat) if stat.count > 0 => Ok(stat.cumulative_cost as f64 / stat.count as f64),
            _ => Err(FeudalError::DivisionUndefined(format!(
                "{state}/{action} -> {destination}"
            ))),
        }
    }

    /// Destinations ever observed for a pair, in first-seen order.
    pub fn destinations(
        &self,
        state: &StateId,
        action: &Action,
    ) -> impl Iterator<Item = (&StateId, &TransitionStat)> {
        self.destinations
            .get(&Self::key(state, action))
            .into_iter()
            .flat_map(IndexMap::iter)
    }

    /// Check the counting invariant: for every pair,
    /// `sample_count == Σ destination counts`.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        self.samples.iter().all(|(key, &samples)| {
            let total: u64 = self
                .destinations
                .get(key)
                .map_or(0, |stats| stats.values().map(|stat| stat.count).sum());
            total == samples
        })
    }

    /// Restore a pair's statistics wholesale (persistence path).
    pub(crate) fn restore(
        &mut self,
        state: StateId,
        action: Action,
        samples: u64,
        destinations: IndexMap<StateId, TransitionStat>,
    ) -> Result<()> {
        let total: u64 = destinations.values().map(|stat| stat.count).sum();
        if total != samples {
            return Err(FeudalError::Configuration(format!(
                "corrupted table for {state}/{action}: {total} transitions against {samples} samples"
            )));
        }
        let key = StateAction::new(state, action);
        if samples > 0 {
            self.samples.insert(key.clone(), samples);
        }
        if !destinations.is_empty() {
            self.destinations.insert(key, destinations);
        }
        Ok(())
    }
}
