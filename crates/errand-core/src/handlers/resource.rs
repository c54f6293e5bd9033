//! `use_resource`: check a resource, apply it, confirm its effect.
//!
//! Parameters:
//! - `resource_id` (required)
//! - `expected_effect`: a `Condition` that must hold after use
//! - `context`: passed to the environment (defaults to the task's initial context)
//! - `actor`: who uses it (defaults to the configured actor)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Condition, FailureReason, Parameters, Step, StepFailure, StepResult};
use crate::ports::{EnvError, ResourceUse};

use super::{SharedEnvironment, StepContext, StepHandler, actor_of, condition_param};

const APPLIED: &str = "applied";

pub struct UseResource {
    default_actor: String,
    poll_interval: Duration,
}

impl UseResource {
    pub fn new(default_actor: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            default_actor: default_actor.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl StepHandler for UseResource {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["resource_id"]
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<(), String> {
        match parameters.get("resource_id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err("'resource_id' must be a non-empty string".to_string()),
        }
        if let Some(raw) = parameters.get("expected_effect") {
            let effect: Condition = serde_json::from_value(raw.clone())
                .map_err(|e| format!("'expected_effect': {e}"))?;
            effect.validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError> {
        let Some(resource_id) = step.param_str("resource_id") else {
            return Ok(StepResult::Failure(StepFailure::permanent(
                FailureReason::ResourceUnavailable,
                format!("step {} has no 'resource_id'", step.id),
            )));
        };
        let expected_effect = match condition_param(step, "expected_effect") {
            Ok(effect) => effect,
            Err(failure) => return Ok(StepResult::Failure(failure)),
        };
        let actor = actor_of(step, &self.default_actor);

        let applied = ctx.scratch.get(APPLIED).and_then(Value::as_bool).unwrap_or(false);
        if !applied {
            if !env.evaluate(&Condition::resource_available(resource_id)).await? {
                return Ok(StepResult::failure(
                    FailureReason::ResourceUnavailable,
                    format!("resource '{resource_id}' is not available"),
                ));
            }

            let context = step
                .param("context")
                .cloned()
                .unwrap_or_else(|| ctx.initial_context.clone());
            match env.use_resource(actor, resource_id, &context).await? {
                ResourceUse::Applied => {
                    ctx.scratch.insert(APPLIED.to_string(), Value::Bool(true));
                }
                ResourceUse::Unavailable { detail, permanent } => {
                    let failure = if permanent {
                        StepFailure::permanent(FailureReason::ResourceUnavailable, detail)
                    } else {
                        StepFailure::new(FailureReason::ResourceUnavailable, detail)
                    };
                    return Ok(StepResult::Failure(failure));
                }
            }
        }

        let Some(effect) = expected_effect else {
            return Ok(StepResult::success(format!("{actor} used '{resource_id}'")));
        };
        if env.evaluate(&effect).await? {
            return Ok(StepResult::success(format!(
                "{actor} used '{resource_id}', {effect} observed"
            )));
        }
        if ctx.timed_out() {
            return Ok(StepResult::failure(
                FailureReason::EffectNotObserved,
                format!("'{resource_id}' applied but {effect} never held"),
            ));
        }
        Ok(StepResult::waiting_on(effect, self.poll_interval))
    }

    async fn check_success(&self, step: &Step, env: &SharedEnvironment) -> Result<bool, EnvError> {
        match condition_param(step, "expected_effect") {
            Ok(Some(effect)) => env.evaluate(&effect).await,
            _ => Ok(false),
        }
    }

    fn timeout_reason(&self) -> FailureReason {
        FailureReason::EffectNotObserved
    }
}
