use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::domain::{RegistryError, RetryPolicy, Step, StepType};

use super::{
    ESCORT_OR_DEFEND, EscortOrDefend, StepHandler, TRAVEL_TO, TravelTo, USE_RESOURCE, UseResource,
    WAIT_FOR_CONDITION, WaitForCondition,
};

/// Registry-wide defaults for steps that do not set their own.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefaults {
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Registry of handlers (step_type -> handler).
///
/// Built during initialization (mutable), shared read-only behind an `Arc`
/// once the engine runs. No locks needed.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
    defaults: StepDefaults,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: StepDefaults) -> Self {
        Self {
            handlers: HashMap::new(),
            defaults,
        }
    }

    /// Registry holding the four built-in step types, tuned by `config`.
    pub fn with_builtin_handlers(config: &EngineConfig) -> Self {
        let mut registry = Self::with_defaults(StepDefaults {
            timeout: config.engine.default_timeout(),
            retry_policy: config.retry.policy(),
        });

        let actor = config.engine.default_actor.as_str();
        let poll = config.engine.poll_interval();
        let builtins: [(&str, Arc<dyn StepHandler>); 4] = [
            (WAIT_FOR_CONDITION, Arc::new(WaitForCondition::new(poll))),
            (
                TRAVEL_TO,
                Arc::new(TravelTo::new(actor, config.handlers.arrival_tolerance, poll)),
            ),
            (USE_RESOURCE, Arc::new(UseResource::new(actor, poll))),
            (
                ESCORT_OR_DEFEND,
                Arc::new(EscortOrDefend::new(
                    actor,
                    config.handlers.protection_threshold,
                    Duration::from_secs_f64(config.handlers.escort_grace_seconds),
                    poll,
                )),
            ),
        ];
        for (step_type, handler) in builtins {
            registry.handlers.insert(StepType::new(step_type), handler);
        }
        registry
    }

    /// Register a handler for a step type.
    pub fn register(
        &mut self,
        step_type: impl Into<StepType>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), RegistryError> {
        let step_type = step_type.into();
        if self.handlers.contains_key(&step_type) {
            return Err(RegistryError::AlreadyRegistered(step_type));
        }
        self.handlers.insert(step_type, handler);
        Ok(())
    }

    pub fn get(&self, step_type: &StepType) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(step_type)
    }

    pub fn contains(&self, step_type: &StepType) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered step types, sorted.
    pub fn registered_types(&self) -> Vec<&StepType> {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn defaults(&self) -> &StepDefaults {
        &self.defaults
    }

    /// Step timeout, then the handler's step-derived default, then the
    /// registry default.
    pub fn timeout_for(&self, step: &Step, handler: &dyn StepHandler) -> Duration {
        step.timeout
            .or_else(|| handler.default_timeout(step))
            .unwrap_or(self.defaults.timeout)
    }

    pub fn retry_policy_for(&self, step: &Step) -> RetryPolicy {
        step.retry_policy
            .clone()
            .unwrap_or_else(|| self.defaults.retry_policy.clone())
    }
}
