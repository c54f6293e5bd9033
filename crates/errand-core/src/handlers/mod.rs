//! Step handlers.
//!
//! A handler implements one step type. The engine owns the loop: it calls
//! `execute` once per tick, sleeps between `Pending` ticks, enforces the step
//! timeout and turns failures into retry / fallback decisions. Handlers only
//! answer "what happened on this tick".

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{
    Condition, FailureReason, Parameters, RetryPolicy, Step, StepFailure, StepId, StepResult,
    TaskId,
};
use crate::ports::EnvError;

pub mod escort;
pub mod registry;
pub mod resource;
pub mod travel;
pub mod wait;

pub use crate::impls::SharedEnvironment;
pub use self::escort::EscortOrDefend;
pub use self::registry::{HandlerRegistry, StepDefaults};
pub use self::resource::UseResource;
pub use self::travel::TravelTo;
pub use self::wait::WaitForCondition;

pub const WAIT_FOR_CONDITION: &str = "wait_for_condition";
pub const TRAVEL_TO: &str = "travel_to";
pub const USE_RESOURCE: &str = "use_resource";
pub const ESCORT_OR_DEFEND: &str = "escort_or_defend";

/// Per-attempt context handed to `execute`.
///
/// A fresh context is built for every attempt; `scratch` survives across the
/// `Pending` ticks of one attempt and is dropped on retry.
pub struct StepContext {
    pub task_id: TaskId,
    pub step_id: StepId,

    /// 1-based attempt number of the current step.
    pub attempt: u32,

    pub started_at: Instant,
    pub timeout: Duration,

    /// Context passed to `start_task`.
    pub initial_context: Value,

    /// Handler-private state for multi-tick attempts.
    pub scratch: Map<String, Value>,

    cancel: watch::Receiver<bool>,
}

impl StepContext {
    pub fn new(
        task_id: TaskId,
        step_id: StepId,
        attempt: u32,
        timeout: Duration,
        initial_context: Value,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_id,
            step_id,
            attempt,
            started_at: Instant::now(),
            timeout,
            initial_context,
            scratch: Map::new(),
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn timed_out(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Long-running handlers may poll this between environment calls.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// The contract every step type implements.
///
/// Only `execute` is required. The defaults give the standard behavior:
/// retry while the policy allows it, fall back when the step has a branch.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Parameter keys that must be present in every step of this type.
    fn required_parameters(&self) -> &'static [&'static str] {
        &[]
    }

    /// Handler-specific checks on parameter values, run at parse time.
    fn validate_parameters(&self, _parameters: &Parameters) -> Result<(), String> {
        Ok(())
    }

    /// One tick of one attempt.
    ///
    /// `Err` is a transport failure; the engine records it as
    /// `EnvironmentUnavailable`.
    async fn execute(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError>;

    /// Idempotent post-condition. Consulted when an attempt is cut short by
    /// the step timeout.
    async fn check_success(&self, _step: &Step, _env: &SharedEnvironment) -> Result<bool, EnvError> {
        Ok(false)
    }

    /// Whether to attempt the step again after `attempt` failed attempts.
    /// Permanent failures are never retried.
    fn should_retry(
        &self,
        _step: &Step,
        policy: &RetryPolicy,
        attempt: u32,
        last: &StepFailure,
    ) -> bool {
        last.transient && policy.allows_retry(attempt)
    }

    /// Whether to fall back once retries are exhausted.
    fn should_fallback(&self, step: &Step, _attempt: u32) -> bool {
        step.has_fallback()
    }

    /// Reason recorded when the engine enforces the step timeout.
    fn timeout_reason(&self) -> FailureReason {
        FailureReason::StepTimeout
    }

    /// Timeout derived from the step itself, used when the step sets none.
    fn default_timeout(&self, _step: &Step) -> Option<Duration> {
        None
    }
}

/// Actor a step acts as: its `actor` parameter, else `default`.
pub(crate) fn actor_of<'a>(step: &'a Step, default: &'a str) -> &'a str {
    step.param_str("actor").unwrap_or(default)
}

/// Typed parameter that was validated at parse time.
///
/// Returns a permanent failure with `reason` when it is missing or malformed,
/// which only happens for steps built in code.
pub(crate) fn typed_param<T: serde::de::DeserializeOwned>(
    step: &Step,
    key: &str,
    reason: FailureReason,
) -> Result<T, StepFailure> {
    match step.param_as::<T>(key) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(StepFailure::permanent(
            reason,
            format!("step {} has no '{key}' parameter", step.id),
        )),
        Err(message) => Err(StepFailure::permanent(reason, message)),
    }
}

/// Condition parameter, decoded and structurally checked. `Ok(None)` when
/// absent; a malformed one is a permanent `InvalidParameter` failure.
pub(crate) fn condition_param(step: &Step, key: &str) -> Result<Option<Condition>, StepFailure> {
    let invalid = |message: String| {
        StepFailure::permanent(
            FailureReason::InvalidParameter,
            format!("step {}: {message}", step.id),
        )
    };
    let condition = step.param_as::<Condition>(key).map_err(invalid)?;
    if let Some(condition) = &condition {
        condition
            .validate()
            .map_err(|e| invalid(format!("'{key}': {e}")))?;
    }
    Ok(condition)
}

/// Optional numeric parameter that must be finite and within `range`.
pub(crate) fn check_number(
    parameters: &Parameters,
    key: &str,
    range: std::ops::RangeInclusive<f64>,
) -> Result<(), String> {
    match parameters.get(key) {
        None => Ok(()),
        Some(value) => match value.as_f64() {
            Some(n) if n.is_finite() && range.contains(&n) => Ok(()),
            _ => Err(format!(
                "'{key}' must be a number in {}..={} (got {value})",
                range.start(),
                range.end()
            )),
        },
    }
}
