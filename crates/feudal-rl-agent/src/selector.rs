//! Action selection: exploration, greedy policy lookup and the warm-up gate

use rand::Rng;

use feudal_rl_core::{Action, FeudalError, Result, StateId, Task};

use crate::registry::ActionRegistry;
use crate::value::{QTable, UtilityTable};

/// What a node decided to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// A recordable action: primitive move or exit delegation
    Learnable(Action),
    /// Delegate free exploration to the lower level
    DelegateExplore,
    /// Delegate goal seeking to the lower level
    DelegateFindGoal,
    /// Goal reached at the lowest level; nothing left to do
    Idle,
}

/// Uniform random legal action.
pub fn random_action<R: Rng>(
    rng: &mut R,
    registry: &ActionRegistry,
    state: &StateId,
) -> Result<Action> {
    let legal = registry.legal(state)?;
    if legal.is_empty() {
        return Err(FeudalError::Configuration(format!(
            "state {state} has no legal actions to explore"
        )));
    }
    Ok(legal[rng.gen_range(0..legal.len())].clone())
}

/// Greedy argmax over a value lookup: first-seen max in registration order,
/// strictly positive values only. Returns `None` when nothing beats the
/// zero floor, so unexplored pairs (utility 0, or no table entry) can never
/// be selected as optimal.
pub fn best_action<F>(
    registry: &ActionRegistry,
    state: &StateId,
    value_of: F,
) -> Result<Option<Action>>
where
    F: Fn(&Action) -> Option<f64>,
{
    let mut best: Option<(&Action, f64)> = None;
    for action in registry.legal(state)? {
        let Some(value) = value_of(action) else {
            continue;
        };
        let floor = best.map_or(0.0, |(_, current)| current);
        if value > floor {
            best = Some((action, value));
        }
    }
    Ok(best.map(|(action, _)| action.clone()))
}

/// Select the next action for `state` under `task`.
///
/// The warm-up gate forces exploration for every non-lowest node until its
/// transition model has had time to gather support; greedy lookups fall
/// back to exploration (resolved to a random primitive at the lowest level)
/// when no explored action stands out.
#[allow(clippy::too_many_arguments)]
pub fn select<R: Rng>(
    rng: &mut R,
    task: &Task,
    goal: Option<&StateId>,
    state: &StateId,
    registry: &ActionRegistry,
    q: &QTable,
    utility: &UtilityTable,
    is_lowest: bool,
    in_warmup: bool,
) -> Result<Choice> {
    if in_warmup && !is_lowest {
        return Ok(Choice::DelegateExplore);
    }

    match task {
        Task::Explore => Ok(Choice::Learnable(random_action(rng, registry, state)?)),

        Task::FindGoal => match goal {
            Some(goal) if state != goal => {
                match best_action(registry, state, |action| utility.get(state, action))? {
                    Some(action) => Ok(Choice::Learnable(action)),
                    None if is_lowest => {
                        Ok(Choice::Learnable(random_action(rng, registry, state)?))
                    }
                    None => Ok(Choice::DelegateExplore),
                }
            }
            // Standing on the goal: pass goal seeking down so the lower
            // level can finish (and report), or idle at the bottom.
            Some(_) if !is_lowest => Ok(Choice::DelegateFindGoal),
            Some(_) => Ok(Choice::Idle),
            // No goal inside this partition: nothing to aim at, explore.
            None if is_lowest => Ok(Choice::Learnable(random_action(rng, registry, state)?)),
            None => Ok(Choice::DelegateExplore),
        },

        Task::ExitTo(target) => {
            match best_action(registry, state, |action| q.get(target, state, action))? {
                Some(action) => Ok(Choice::Learnable(action)),
                None if is_lowest => Ok(Choice::Learnable(random_action(rng, registry, state)?)),
                None => Ok(Choice::DelegateExplore),
            }
        }

        Task::Idle | Task::NewEpisode => Err(FeudalError::Protocol(format!(
            "cannot select an action under task {task}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feudal_rl_core::Direction;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (ActionRegistry, StateId) {
        let state = StateId::from("c0");
        let mut registry = ActionRegistry::new();
        for direction in Direction::ALL {
            registry.register(&state, Action::Primitive(direction));
        }
        (registry, state)
    }

    #[test]
    fn warmup_forces_delegated_exploration_for_upper_nodes() {
        let (registry, state) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        let choice = select(
            &mut rng,
            &Task::ExitTo(StateId::from("X")),
            None,
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            false,
            true,
        )
        .unwrap();
        assert_eq!(choice, Choice::DelegateExplore);
    }

    #[test]
    fn warmup_does_not_gate_the_lowest_level() {
        let (registry, state) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        let choice = select(
            &mut rng,
            &Task::Explore,
            None,
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            true,
            true,
        )
        .unwrap();
        assert!(matches!(choice, Choice::Learnable(Action::Primitive(_))));
    }

    #[test]
    fn greedy_is_first_seen_max_over_registration_order() {
        let (registry, state) = setup();
        let mut utility = UtilityTable::new();
        // North and South tie; North was registered first and must win.
        utility.set(state.clone(), Action::Primitive(Direction::North), 2.0);
        utility.set(state.clone(), Action::Primitive(Direction::South), 2.0);
        utility.set(state.clone(), Action::Primitive(Direction::East), 1.0);

        let mut rng = StdRng::seed_from_u64(1);
        let choice = select(
            &mut rng,
            &Task::FindGoal,
            Some(&StateId::from("c9")),
            &state,
            &registry,
            &QTable::new(),
            &utility,
            true,
            false,
        )
        .unwrap();
        assert_eq!(
            choice,
            Choice::Learnable(Action::Primitive(Direction::North))
        );
    }

    #[test]
    fn empty_utility_falls_back_to_random_at_the_lowest_level() {
        let (registry, state) = setup();
        let mut rng = StdRng::seed_from_u64(7);
        let choice = select(
            &mut rng,
            &Task::FindGoal,
            Some(&StateId::from("c9")),
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            true,
            false,
        )
        .unwrap();
        assert!(matches!(choice, Choice::Learnable(Action::Primitive(_))));
    }

    #[test]
    fn standing_on_the_goal_idles_or_delegates() {
        let (registry, state) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        let at_goal = select(
            &mut rng,
            &Task::FindGoal,
            Some(&state),
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            true,
            false,
        )
        .unwrap();
        assert_eq!(at_goal, Choice::Idle);

        let delegated = select(
            &mut rng,
            &Task::FindGoal,
            Some(&state),
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            false,
            false,
        )
        .unwrap();
        assert_eq!(delegated, Choice::DelegateFindGoal);
    }

    #[test]
    fn management_tasks_cannot_select() {
        let (registry, state) = setup();
        let mut rng = StdRng::seed_from_u64(1);
        let err = select(
            &mut rng,
            &Task::Idle,
            None,
            &state,
            &registry,
            &QTable::new(),
            &UtilityTable::new(),
            true,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, FeudalError::Protocol(_)));
    }
}
