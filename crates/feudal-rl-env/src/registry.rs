//! Environment registry for creation by name

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use feudal_rl_core::{FeudalError, PartitionSpec, Result};

use crate::grid::{GridConfig, GridWorldEnv};
use crate::presets;

/// Options applied to a registered environment at construction time.
#[derive(Debug, Clone, Default)]
pub struct EnvRequest {
    /// Random seed override
    pub seed: Option<u64>,
    /// Goal cell override
    pub goal: Option<(usize, usize)>,
}

type EnvConstructor =
    Box<dyn Fn(&EnvRequest) -> Result<(GridWorldEnv, PartitionSpec)> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: Mutex<EnvRegistry> = Mutex::new(EnvRegistry::with_defaults());
}

/// Registry of named environment setups.
pub struct EnvRegistry {
    envs: HashMap<String, EnvConstructor>,
}

impl EnvRegistry {
    fn with_defaults() -> Self {
        let mut registry = Self {
            envs: HashMap::new(),
        };
        registry.register("grid-4x4", |request| {
            build_preset(presets::grid_4x4(), request)
        });
        registry.register("grid-8x8", |request| {
            build_preset(presets::grid_8x8(), request)
        });
        registry
    }

    /// Register an environment constructor under a name.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&EnvRequest) -> Result<(GridWorldEnv, PartitionSpec)> + Send + Sync + 'static,
    {
        self.envs.insert(name.into(), Box::new(constructor));
    }

    /// Create an environment by name.
    pub fn make(&self, name: &str, request: &EnvRequest) -> Result<(GridWorldEnv, PartitionSpec)> {
        self.envs
            .get(name)
            .ok_or_else(|| FeudalError::Environment(format!("unknown environment: {name}")))
            .and_then(|constructor| constructor(request))
    }

    /// List registered environments.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.envs.keys().cloned().collect()
    }
}

fn build_preset(
    (mut config, spec): (GridConfig, PartitionSpec),
    request: &EnvRequest,
) -> Result<(GridWorldEnv, PartitionSpec)> {
    config.seed = request.seed;
    if request.goal.is_some() {
        config.goal = request.goal;
    }
    Ok((GridWorldEnv::new(config)?, spec))
}

/// Register an environment globally.
pub fn register_env<F>(name: impl Into<String>, constructor: F)
where
    F: Fn(&EnvRequest) -> Result<(GridWorldEnv, PartitionSpec)> + Send + Sync + 'static,
{
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, constructor);
}

/// Create an environment by name.
pub fn make_env(name: &str, request: &EnvRequest) -> Result<(GridWorldEnv, PartitionSpec)> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .make(name, request)
}

/// List all registered environments.
#[must_use]
pub fn list_envs() -> Vec<String> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feudal_rl_core::Environment;

    #[test]
    fn presets_are_registered_by_default() {
        let names = list_envs();
        assert!(names.iter().any(|name| name == "grid-4x4"));
        assert!(names.iter().any(|name| name == "grid-8x8"));
    }

    #[test]
    fn make_env_applies_the_request() {
        let (env, spec) = make_env(
            "grid-4x4",
            &EnvRequest {
                seed: Some(9),
                goal: Some((3, 0)),
            },
        )
        .unwrap();
        assert_eq!(env.states().len(), 16);
        spec.validate(&env.states()).unwrap();
    }

    #[test]
    fn unknown_environments_are_an_error() {
        let err = make_env("grid-999", &EnvRequest::default()).unwrap_err();
        assert!(matches!(err, FeudalError::Environment(_)));
    }
}
