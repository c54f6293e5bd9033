//! EngineBuilder: wiring and start-up validation.
//!
//! Built-in handlers are registered from the config up front; custom step
//! types are added with `register`. `build` fails fast when a step type the
//! caller announced with `expect_step_types` is missing, or when no
//! environment was supplied.

use std::sync::Arc;

use super::engine::Engine;
use crate::config::{ConfigError, EngineConfig};
use crate::domain::{RegistryError, StepType};
use crate::handlers::{HandlerRegistry, StepHandler};
use crate::ports::EnvironmentContext;

/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .register("open_chest", Arc::new(OpenChest))?
///     .environment(env)
///     .expect_step_types(&["open_chest", "travel_to"])
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    environment: Option<Arc<dyn EnvironmentContext>>,
    expected_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing step types: {0:?}. These step types were expected but not registered.")]
    MissingStepTypes(Vec<String>),

    #[error("no environment context was supplied")]
    MissingEnvironment,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        let registry = HandlerRegistry::with_builtin_handlers(&config);
        Self {
            config,
            registry,
            environment: None,
            expected_types: None,
        }
    }

    pub fn register(
        mut self,
        step_type: impl Into<StepType>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(step_type, handler)?;
        Ok(self)
    }

    pub fn environment(mut self, environment: Arc<dyn EnvironmentContext>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn expect_step_types(mut self, step_types: &[&str]) -> Self {
        self.expected_types = Some(step_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|x| !registered.iter().any(|t| t.as_str() == x.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingStepTypes(missing));
            }
        }

        let environment = self.environment.ok_or(BuildError::MissingEnvironment)?;
        Ok(Engine::new(self.config, self.registry, environment))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
