//! Decision model: what the engine does after a failed attempt.
//!
//! Deciding is a pure function of the step, its policy, the attempt count and
//! the failure. Applying the decision (sleeping, splicing, marking the task
//! failed) is the runner's job.

use std::time::Duration;

use super::outcome::{FailureReason, StepFailure};
use super::retry::RetryPolicy;
use super::step::Step;
use crate::handlers::StepHandler;

/// The next action after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Attempt the same step again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Retries are exhausted; try a fallback branch if one is left.
    Fallback { reason: String },

    /// Give up on this step.
    Fail { reason: String },
}

/// Inputs for one decision.
pub struct DecisionInput<'a> {
    pub handler: &'a dyn StepHandler,
    pub step: &'a Step,
    pub policy: &'a RetryPolicy,

    /// Failed attempts of this step so far, the current one included.
    pub attempt: u32,

    pub failure: &'a StepFailure,
}

/// Default recovery policy.
///
/// - Transport failures (`EnvironmentUnavailable`) are retried while the
///   retry budget lasts, whatever the handler thinks.
/// - Other failures are retried when the handler's `should_retry` agrees.
/// - Otherwise fall back when the handler's `should_fallback` agrees.
pub fn decide(input: &DecisionInput<'_>) -> Decision {
    let retry = if input.failure.reason == FailureReason::EnvironmentUnavailable {
        input.policy.allows_retry(input.attempt)
    } else {
        input
            .handler
            .should_retry(input.step, input.policy, input.attempt, input.failure)
    };

    if retry {
        let delay = input.policy.next_delay(input.attempt);
        return Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                input.attempt + 1,
                input.policy.max_attempts,
                delay
            ),
        };
    }

    if input.handler.should_fallback(input.step, input.attempt) {
        Decision::Fallback {
            reason: format!("retries exhausted after {} attempt(s)", input.attempt),
        }
    } else {
        Decision::Fail {
            reason: format!(
                "{} after {} attempt(s), no fallback",
                input.failure.reason, input.attempt
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::StepResult;
    use crate::handlers::{SharedEnvironment, StepContext};
    use crate::ports::EnvError;
    use async_trait::async_trait;

    /// Refuses every retry, like a handler facing a permanent error.
    struct Stubborn;

    #[async_trait]
    impl StepHandler for Stubborn {
        async fn execute(
            &self,
            _step: &Step,
            _env: &SharedEnvironment,
            _ctx: &mut StepContext,
        ) -> Result<StepResult, EnvError> {
            Ok(StepResult::success("noop"))
        }

        fn should_retry(&self, _: &Step, _: &RetryPolicy, _: u32, _: &StepFailure) -> bool {
            false
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    fn decide_for(step: &Step, policy: &RetryPolicy, attempt: u32, reason: FailureReason) -> Decision {
        let failure = StepFailure::new(reason, "boom");
        decide(&DecisionInput {
            handler: &Stubborn,
            step,
            policy,
            attempt,
            failure: &failure,
        })
    }

    #[test]
    fn environment_errors_override_handler_veto() {
        let step = Step::new("s1", "stub");
        let d = decide_for(&step, &policy(3), 1, FailureReason::EnvironmentUnavailable);
        assert!(matches!(d, Decision::Retry { delay, .. } if delay == Duration::from_secs(1)));

        let d = decide_for(&step, &policy(3), 2, FailureReason::EnvironmentUnavailable);
        assert!(matches!(d, Decision::Retry { delay, .. } if delay == Duration::from_secs(2)));
    }

    #[test]
    fn environment_errors_respect_the_budget() {
        let step = Step::new("s1", "stub");
        let d = decide_for(&step, &policy(3), 3, FailureReason::EnvironmentUnavailable);
        assert!(matches!(d, Decision::Fail { .. }));
    }

    #[test]
    fn handler_veto_goes_to_fallback_when_available() {
        let step = Step::new("s1", "stub").with_fallback(vec![Step::new("s1b", "stub")]);
        let d = decide_for(&step, &policy(5), 1, FailureReason::RouteUnavailable);
        assert!(matches!(d, Decision::Fallback { .. }));
    }

    #[test]
    fn no_fallback_means_fail() {
        let step = Step::new("s1", "stub");
        let d = decide_for(&step, &policy(0), 1, FailureReason::ConditionTimeout);
        assert!(matches!(d, Decision::Fail { reason } if reason.contains("CONDITION_TIMEOUT")));
    }
}
