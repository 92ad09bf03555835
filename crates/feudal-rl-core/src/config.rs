//! Learning configuration threaded through hierarchy construction

use serde::{Deserialize, Serialize};

use crate::SimTime;

/// Learning-rate schedule for the tabular Q update.
///
/// The schedule in use is part of a deployment's contract: convergence of
/// tabular Q-learning depends on it, so it is configured explicitly rather
/// than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LearningRate {
    /// Fixed alpha
    Constant(f64),
    /// `alpha = k / (k0 + n)` where `n` is the (state, action) sample count
    VisitDecay {
        /// Numerator
        k: f64,
        /// Offset added to the visit count
        k0: f64,
    },
}

impl LearningRate {
    /// Alpha for a pair that has collected `samples` observations.
    #[must_use]
    pub fn alpha(&self, samples: u64) -> f64 {
        match *self {
            LearningRate::Constant(alpha) => alpha,
            #[allow(clippy::cast_precision_loss)]
            LearningRate::VisitDecay { k, k0 } => k / (k0 + samples as f64),
        }
    }
}

/// Value assigned to cross-partition destinations during value iteration.
///
/// Historical variants disagreed on this term, so it is a named option
/// rather than an implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalValueRule {
    /// `reward_max` for the goal, 0 for any other external destination
    GoalOrZero,
    /// As `GoalOrZero`, but non-goal exits cost `penalty * mean_cost`
    GoalOrCostPenalty,
}

/// Configuration for one hierarchy of agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Discount factor
    pub gamma: f64,
    /// Value-iteration tolerance (bounds the policy loss)
    pub epsilon: f64,
    /// Reward granted on reaching a task's terminal state
    pub reward_max: f64,
    /// Per-step cost penalty applied to task rewards
    pub penalty: f64,
    /// Learning-rate schedule for the online Q update
    pub learning_rate: LearningRate,
    /// Cross-partition destination convention for value iteration
    pub external_value: ExternalValueRule,
    /// Hard cap on value-iteration sweeps
    pub max_iterations: usize,
    /// Simulated time before which non-lowest agents only explore
    pub warmup: SimTime,
    /// Episode-length cap during warm-up, as a multiple of the partition size
    pub exploration_episode_factor: u64,
    /// Random seed (`None` draws from entropy)
    pub seed: Option<u64>,
}

impl LearningConfig {
    /// Optimistic initial Q value: the best reward reachable from a state
    /// one transition away from the exit.
    #[must_use]
    pub fn optimistic_q(&self) -> f64 {
        self.gamma * self.reward_max
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            gamma: 0.8,
            epsilon: 0.1,
            reward_max: 4.0,
            penalty: 1.0,
            learning_rate: LearningRate::VisitDecay { k: 10.0, k0: 50.0 },
            external_value: ExternalValueRule::GoalOrZero,
            max_iterations: 1_000,
            warmup: 0,
            exploration_episode_factor: 3,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_decay_shrinks_with_samples() {
        let schedule = LearningRate::VisitDecay { k: 10.0, k0: 50.0 };
        assert!(schedule.alpha(0) > schedule.alpha(100));
        assert!((schedule.alpha(0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn constant_rate_ignores_samples() {
        let schedule = LearningRate::Constant(0.1);
        assert!((schedule.alpha(0) - schedule.alpha(1_000)).abs() < f64::EPSILON);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = LearningConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: LearningConfig = serde_json::from_str(&json).unwrap();
        assert!((back.gamma - config.gamma).abs() < f64::EPSILON);
        assert_eq!(back.external_value, config.external_value);
    }
}
