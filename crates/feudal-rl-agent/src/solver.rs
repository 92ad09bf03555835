//! Value iteration over the learned transition model

use tracing::{debug, warn};

use feudal_rl_core::{ExternalValueRule, LearningConfig, Result, StateId};

use crate::registry::ActionRegistry;
use crate::transition::TransitionModel;
use crate::value::UtilityTable;

/// Outcome of a value-iteration run.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Converged (or best-so-far) utilities
    pub utilities: UtilityTable,
    /// Sweeps performed
    pub iterations: usize,
    /// Whether the stopping bound was met within the iteration cap
    pub converged: bool,
}

/// Compute utilities for every (state, legal action) pair of `states` with
/// respect to `goal`.
///
/// The goal's own actions are pinned at `reward_max` (absorbing). Pairs with
/// zero samples keep utility 0: their transition distribution is undefined
/// and they must never look better than explored alternatives. Destinations
/// outside the partition contribute the configured external value.
///
/// Sweeps stop once the largest per-pair change falls below
/// `epsilon * (1 - gamma) / gamma`, the standard bound guaranteeing at most
/// `epsilon` policy loss. Hitting the iteration cap returns the best-so-far
/// table flagged unconverged rather than looping forever.
pub fn value_iteration(
    model: &TransitionModel,
    registry: &ActionRegistry,
    states: &[StateId],
    goal: &StateId,
    config: &LearningConfig,
) -> Result<Solution> {
    let mut current = UtilityTable::new();
    for state in states {
        for action in registry.legal(state)? {
            let initial = if state == goal { config.reward_max } else { 0.0 };
            current.set(state.clone(), action.clone(), initial);
        }
    }

    let threshold = config.epsilon * (1.0 - config.gamma) / config.gamma;
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        let mut next = UtilityTable::new();
        let mut delta = 0.0f64;

        for state in states {
            for action in registry.legal(state)? {
                let value = if state == goal {
                    config.reward_max
                } else if model.sample_count(state, action) == 0 {
                    0.0
                } else {
                    let mut accumulated = 0.0;
                    for (destination, _) in model.destinations(state, action) {
                        let probability = model.probability(state, action, destination)?;
                        let mean_cost = model.mean_cost(state, action, destination)?;
                        let destination_value = if states.contains(destination) {
                            let mut best = 0.0f64;
                            for next_action in registry.legal(destination)? {
                                if let Some(utility) = current.get(destination, next_action) {
                                    if utility > best {
                                        best = utility;
                                    }
                                }
                            }
                            best
                        } else {
                            external_value(destination, goal, mean_cost, config)
                        };
                        accumulated +=
                            probability * config.gamma.powf(mean_cost) * destination_value;
                    }
                    accumulated
                };

                let previous = current.get(state, action).unwrap_or(0.0);
                let change = (value - previous).abs();
                if change > delta {
                    delta = change;
                }
                next.set(state.clone(), action.clone(), value);
            }
        }

        current = next;

        if delta <= threshold {
            debug!(iterations, delta, "value iteration converged");
            return Ok(Solution {
                utilities: current,
                iterations,
                converged: true,
            });
        }
        if iterations >= config.max_iterations {
            warn!(
                iterations,
                delta, "value iteration hit the sweep cap before converging"
            );
            return Ok(Solution {
                utilities: current,
                iterations,
                converged: false,
            });
        }
    }
}

fn external_value(
    destination: &StateId,
    goal: &StateId,
    mean_cost: f64,
    config: &LearningConfig,
) -> f64 {
    if destination == goal {
        config.reward_max
    } else {
        match config.external_value {
            ExternalValueRule::GoalOrZero => 0.0,
            ExternalValueRule::GoalOrCostPenalty => -config.penalty * mean_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feudal_rl_core::{Action, Direction, ExternalValueRule};

    /// Deterministic 2-state chain: from c0, `East` reaches c1 (the goal)
    /// and `West` loops back to c0.
    fn chain() -> (TransitionModel, ActionRegistry, Vec<StateId>) {
        let states = vec![StateId::from("c0"), StateId::from("c1")];
        let east = Action::Primitive(Direction::East);
        let west = Action::Primitive(Direction::West);
        let mut registry = ActionRegistry::new();
        for state in &states {
            registry.register(state, east.clone());
            registry.register(state, west.clone());
        }
        let mut model = TransitionModel::new();
        for _ in 0..10 {
            model
                .record(&registry, &states[0], &east, &states[1], 1)
                .unwrap();
            model
                .record(&registry, &states[0], &west, &states[0], 1)
                .unwrap();
            model
                .record(&registry, &states[1], &east, &states[1], 1)
                .unwrap();
            model
                .record(&registry, &states[1], &west, &states[0], 1)
                .unwrap();
        }
        (model, registry, states)
    }

    #[test]
    fn converges_to_the_analytic_fixed_point() {
        let (model, registry, states) = chain();
        let config = LearningConfig {
            epsilon: 1e-6,
            ..LearningConfig::default()
        };
        let goal = states[1].clone();
        let solution = value_iteration(&model, &registry, &states, &goal, &config).unwrap();
        assert!(solution.converged);

        // The goal is absorbing at reward_max; from c0, East lands on the
        // goal deterministically: U(c0, East) = gamma * reward_max.
        let east = Action::Primitive(Direction::East);
        let west = Action::Primitive(Direction::West);
        let u_east = solution.utilities.get(&states[0], &east).unwrap();
        let expected = config.gamma * config.reward_max;
        approx::assert_abs_diff_eq!(u_east, expected, epsilon = 1e-3);

        // West self-loops: U(c0, West) = gamma * max_a U(c0, a)
        //                              = gamma^2 * reward_max at the fixed point.
        let u_west = solution.utilities.get(&states[0], &west).unwrap();
        approx::assert_abs_diff_eq!(u_west, config.gamma * expected, epsilon = 1e-3);
        assert!(u_east > u_west);
    }

    #[test]
    fn halving_epsilon_never_reduces_iterations() {
        let (model, registry, states) = chain();
        let goal = states[1].clone();
        let mut config = LearningConfig {
            epsilon: 0.1,
            ..LearningConfig::default()
        };
        let coarse = value_iteration(&model, &registry, &states, &goal, &config)
            .unwrap()
            .iterations;
        config.epsilon /= 2.0;
        let fine = value_iteration(&model, &registry, &states, &goal, &config)
            .unwrap()
            .iterations;
        assert!(fine >= coarse);
    }

    #[test]
    fn unexplored_pairs_keep_zero_utility() {
        let states = vec![StateId::from("c0"), StateId::from("c1")];
        let east = Action::Primitive(Direction::East);
        let mut registry = ActionRegistry::new();
        for state in &states {
            registry.register(state, east.clone());
        }
        let model = TransitionModel::new();
        let solution = value_iteration(
            &model,
            &registry,
            &states,
            &states[1],
            &LearningConfig::default(),
        )
        .unwrap();
        assert!((solution.utilities.get(&states[0], &east).unwrap() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn iteration_cap_returns_best_so_far_unconverged() {
        let (model, registry, states) = chain();
        let config = LearningConfig {
            epsilon: 1e-12,
            max_iterations: 2,
            ..LearningConfig::default()
        };
        let solution =
            value_iteration(&model, &registry, &states, &states[1], &config).unwrap();
        assert!(!solution.converged);
        assert_eq!(solution.iterations, 2);
        assert!(!solution.utilities.is_empty());
    }

    #[test]
    fn q_learning_and_value_iteration_agree_on_the_policy() {
        use crate::registry::TaskRegistry;
        use crate::selector::best_action;
        use crate::value::QTable;
        use feudal_rl_core::{LearningRate, Task};

        // Three-state corridor c0 -> c1 -> c2 exiting to X; West self-loops.
        let states: Vec<StateId> = ["c0", "c1", "c2"].iter().map(|s| StateId::from(*s)).collect();
        let exit = StateId::from("X");
        let east = Action::Primitive(Direction::East);
        let west = Action::Primitive(Direction::West);
        let mut registry = ActionRegistry::new();
        for state in &states {
            registry.register(state, east.clone());
            registry.register(state, west.clone());
        }

        let config = LearningConfig {
            gamma: 0.5,
            penalty: 0.0,
            learning_rate: LearningRate::VisitDecay { k: 10.0, k0: 50.0 },
            ..LearningConfig::default()
        };
        let mut tasks = TaskRegistry::new();
        tasks.register(Task::ExitTo(exit.clone())).unwrap();

        let mut model = TransitionModel::new();
        let mut q = QTable::new();
        q.seed_task(&exit, &registry, config.optimistic_q());

        // Fixed exploration policy visiting every pair over and over.
        let mut learn = |model: &mut TransitionModel,
                         q: &mut QTable,
                         from: &StateId,
                         action: &Action,
                         to: &StateId,
                         internal: bool| {
            model.record(&registry, from, action, to, 1).unwrap();
            let next = internal.then(|| registry.legal(to).unwrap().to_vec());
            let samples = model.sample_count(from, action);
            q.learn(
                &tasks,
                &config,
                samples,
                from,
                action,
                to,
                next.as_deref(),
                1,
            );
        };
        for _ in 0..2_000 {
            learn(&mut model, &mut q, &states[0], &east, &states[1], true);
            learn(&mut model, &mut q, &states[1], &east, &states[2], true);
            learn(&mut model, &mut q, &states[2], &east, &exit, false);
            learn(&mut model, &mut q, &states[0], &west, &states[0], true);
            learn(&mut model, &mut q, &states[1], &west, &states[0], true);
            learn(&mut model, &mut q, &states[2], &west, &states[1], true);
        }

        // The decaying rate drives Q to the semi-Markov fixed point:
        // exits realize reward_max exactly, interior states compound gamma.
        let q_exit = q.get(&exit, &states[2], &east).unwrap();
        approx::assert_abs_diff_eq!(q_exit, config.reward_max, epsilon = 1e-9);
        let q_mid = q.get(&exit, &states[1], &east).unwrap();
        approx::assert_abs_diff_eq!(q_mid, config.gamma * config.reward_max, epsilon = 1e-6);
        let q_far = q.get(&exit, &states[0], &east).unwrap();
        approx::assert_abs_diff_eq!(
            q_far,
            config.gamma * config.gamma * config.reward_max,
            epsilon = 1e-6
        );

        // Value iteration over the same model, aiming at the same exit,
        // induces the same greedy policy in every state.
        let solution = value_iteration(&model, &registry, &states, &exit, &config).unwrap();
        assert!(solution.converged);
        for state in &states {
            let from_q = best_action(&registry, state, |action| q.get(&exit, state, action))
                .unwrap()
                .unwrap();
            let from_vi = best_action(&registry, state, |action| {
                solution.utilities.get(state, action)
            })
            .unwrap()
            .unwrap();
            assert_eq!(from_q, from_vi);
            assert_eq!(from_q, east);
        }
    }

    #[test]
    fn external_penalty_rule_discourages_non_goal_exits() {
        let state = StateId::from("c0");
        let exit = Action::Primitive(Direction::North);
        let mut registry = ActionRegistry::new();
        registry.register(&state, exit.clone());
        let mut model = TransitionModel::new();
        // Leaving towards an external state that is not the goal.
        model
            .record(&registry, &state, &exit, &StateId::from("B9"), 2)
            .unwrap();

        let states = vec![state.clone()];
        let goal = StateId::from("c0-goal-elsewhere");

        let zero_rule = LearningConfig {
            external_value: ExternalValueRule::GoalOrZero,
            ..LearningConfig::default()
        };
        let penalty_rule = LearningConfig {
            external_value: ExternalValueRule::GoalOrCostPenalty,
            ..LearningConfig::default()
        };

        let neutral = value_iteration(&model, &registry, &states, &goal, &zero_rule).unwrap();
        let penalized =
            value_iteration(&model, &registry, &states, &goal, &penalty_rule).unwrap();
        let neutral_u = neutral.utilities.get(&state, &exit).unwrap();
        let penalized_u = penalized.utilities.get(&state, &exit).unwrap();
        assert!((neutral_u - 0.0).abs() < f64::EPSILON);
        assert!(penalized_u < neutral_u);
    }
}
