//! Feudal hierarchical MDP agents
//!
//! This crate implements the learner: per-agent empirical transition
//! models, Q and utility tables, the value-iteration solver, the
//! exploration/exploitation action selector, the per-level protocol state
//! machine, the hierarchy coordinator and model persistence.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod hierarchy;
pub mod node;
pub mod persistence;
pub mod registry;
pub mod selector;
pub mod solver;
pub mod transition;
pub mod value;

// Re-export the main types
pub use hierarchy::Hierarchy;
pub use node::{AgentNode, Outgoing};
pub use persistence::ModelSnapshot;
pub use registry::{ActionRegistry, TaskRegistry};
pub use selector::{best_action, Choice};
pub use solver::{value_iteration, Solution};
pub use transition::{StateAction, TransitionModel, TransitionStat};
pub use value::{QKey, QTable, UtilityTable};

// Re-export core types
pub use feudal_rl_core::{
    Action, AgentId, Command, Direction, Environment, LearningConfig, PartitionSpec, Report,
    Result, StateId, Task,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AgentNode, Hierarchy, ModelSnapshot, PartitionSpec, TransitionModel, UtilityTable,
    };
    pub use feudal_rl_core::prelude::*;
}
