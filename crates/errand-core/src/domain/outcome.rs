//! Outcome model: what one attempt of a step produced.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// Reason code attached to every step failure.
///
/// Serialized as SCREAMING_SNAKE_CASE so log consumers can match on stable
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    ConditionTimeout,
    RouteUnavailable,
    ArrivalTimeout,
    ResourceUnavailable,
    EffectNotObserved,
    ProtectionThresholdBreached,
    /// Engine-enforced timeout for handlers without a more specific code.
    StepTimeout,
    /// Transport-level failure talking to the environment.
    EnvironmentUnavailable,
    /// No handler is registered for the step's type.
    UnknownStepType,
    /// A step built in code carries a missing or malformed parameter.
    InvalidParameter,
    /// External cancellation. Terminal, never a handler failure.
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ConditionTimeout => "CONDITION_TIMEOUT",
            FailureReason::RouteUnavailable => "ROUTE_UNAVAILABLE",
            FailureReason::ArrivalTimeout => "ARRIVAL_TIMEOUT",
            FailureReason::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            FailureReason::EffectNotObserved => "EFFECT_NOT_OBSERVED",
            FailureReason::ProtectionThresholdBreached => "PROTECTION_THRESHOLD_BREACHED",
            FailureReason::StepTimeout => "STEP_TIMEOUT",
            FailureReason::EnvironmentUnavailable => "ENVIRONMENT_UNAVAILABLE",
            FailureReason::UnknownStepType => "UNKNOWN_STEP_TYPE",
            FailureReason::InvalidParameter => "INVALID_PARAMETER",
            FailureReason::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical failure of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub reason: FailureReason,
    pub detail: String,

    /// `false` when retrying cannot help (a route that is permanently
    /// blocked, a resource that no longer exists). Handlers use it to veto
    /// retries.
    #[serde(default = "default_transient")]
    pub transient: bool,
}

fn default_transient() -> bool {
    true
}

impl StepFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            transient: true,
        }
    }

    pub fn permanent(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            transient: false,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Result of one `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The step's goal is reached.
    Success { detail: String },

    /// The attempt is still in progress; call `execute` again after
    /// `retry_after`. The engine moves the task to WAITING meanwhile.
    Pending {
        detail: String,
        condition: Option<Condition>,
        retry_after: Duration,
    },

    /// The attempt failed.
    Failure(StepFailure),
}

impl StepResult {
    pub fn success(detail: impl Into<String>) -> Self {
        StepResult::Success {
            detail: detail.into(),
        }
    }

    pub fn pending(detail: impl Into<String>, retry_after: Duration) -> Self {
        StepResult::Pending {
            detail: detail.into(),
            condition: None,
            retry_after,
        }
    }

    pub fn waiting_on(condition: Condition, retry_after: Duration) -> Self {
        StepResult::Pending {
            detail: format!("waiting for {condition}"),
            condition: Some(condition),
            retry_after,
        }
    }

    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        StepResult::Failure(StepFailure::new(reason, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success { .. })
    }
}
