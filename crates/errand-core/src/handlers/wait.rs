//! `wait_for_condition`: poll a condition until it holds.
//!
//! Parameters:
//! - `condition` (required): a `Condition` object
//! - `poll_interval_seconds`: overrides the configured poll interval

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Condition, FailureReason, Parameters, Step, StepFailure, StepResult};
use crate::ports::EnvError;

use super::{SharedEnvironment, StepContext, StepHandler, check_number, condition_param};

pub struct WaitForCondition {
    poll_interval: Duration,
}

impl WaitForCondition {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn poll_interval(&self, step: &Step) -> Duration {
        step.param_f64("poll_interval_seconds")
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.poll_interval)
    }
}

#[async_trait]
impl StepHandler for WaitForCondition {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["condition"]
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<(), String> {
        let raw = parameters.get("condition").cloned().unwrap_or_default();
        let condition: Condition =
            serde_json::from_value(raw).map_err(|e| format!("'condition': {e}"))?;
        condition.validate().map_err(|e| e.to_string())?;
        check_number(parameters, "poll_interval_seconds", f64::MIN_POSITIVE..=f64::MAX)
    }

    async fn execute(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError> {
        let condition = match condition_param(step, "condition") {
            Ok(Some(condition)) => condition,
            Ok(None) => {
                return Ok(StepResult::Failure(StepFailure::permanent(
                    FailureReason::InvalidParameter,
                    format!("step {} has no 'condition' parameter", step.id),
                )));
            }
            Err(failure) => return Ok(StepResult::Failure(failure)),
        };

        if env.evaluate(&condition).await? {
            return Ok(StepResult::success(format!("{condition} holds")));
        }
        if ctx.timed_out() {
            return Ok(StepResult::Failure(StepFailure::new(
                FailureReason::ConditionTimeout,
                format!("{condition} not met within {:?}", ctx.timeout),
            )));
        }
        Ok(StepResult::waiting_on(condition, self.poll_interval(step)))
    }

    async fn check_success(&self, step: &Step, env: &SharedEnvironment) -> Result<bool, EnvError> {
        match condition_param(step, "condition") {
            Ok(Some(condition)) => env.evaluate(&condition).await,
            _ => Ok(false),
        }
    }

    fn timeout_reason(&self) -> FailureReason {
        FailureReason::ConditionTimeout
    }
}
