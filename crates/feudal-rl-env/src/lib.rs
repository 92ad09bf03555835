//! Grid-world environments for the feudal MDP learner
//!
//! This crate provides the stochastic grid world the lowest hierarchy level
//! interacts with, the canonical 4x4 and 8x8 partition presets, and a
//! registry for creating environments by name.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod grid;
pub mod presets;
pub mod registry;

// Re-export environments
pub use grid::{GridConfig, GridWorldEnv};
pub use registry::{list_envs, make_env, register_env, EnvRegistry, EnvRequest};

// Re-export core types
pub use feudal_rl_core::{EnvStep, Environment, PartitionSpec};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_env, EnvRequest, GridConfig, GridWorldEnv};
    pub use feudal_rl_core::prelude::*;
}
