//! `escort_or_defend`: keep a target safe for a duration or along waypoints.
//!
//! Parameters:
//! - `target` (required)
//! - `duration_seconds` and/or `waypoints` (a list of destinations)
//! - `protection_threshold`: minimum `state_value` of the target
//! - `actor`: who escorts (defaults to the configured actor)
//!
//! Every tick snapshots the target, fails if its state dropped below the
//! threshold, mitigates each reported threat and moves toward the next
//! waypoint. Succeeds once the duration has elapsed and every waypoint was
//! reached.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Destination, FailureReason, Parameters, Step, StepFailure, StepResult};
use crate::ports::{EnvError, Movement};

use super::{SharedEnvironment, StepContext, StepHandler, actor_of, check_number};

const WAYPOINT: &str = "waypoint";

pub struct EscortOrDefend {
    default_actor: String,
    protection_threshold: f64,
    grace: Duration,
    poll_interval: Duration,
}

impl EscortOrDefend {
    pub fn new(
        default_actor: impl Into<String>,
        protection_threshold: f64,
        grace: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            default_actor: default_actor.into(),
            protection_threshold,
            grace,
            poll_interval,
        }
    }

    fn duration(step: &Step) -> Option<Duration> {
        step.param_f64("duration_seconds")
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }

    fn waypoints(step: &Step) -> Vec<Destination> {
        step.param_as::<Vec<Destination>>("waypoints")
            .ok()
            .flatten()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepHandler for EscortOrDefend {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["target"]
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<(), String> {
        match parameters.get("target").and_then(Value::as_str) {
            Some(target) if !target.trim().is_empty() => {}
            _ => return Err("'target' must be a non-empty string".to_string()),
        }
        if !parameters.contains_key("duration_seconds") && !parameters.contains_key("waypoints") {
            return Err("needs 'duration_seconds' or 'waypoints'".to_string());
        }
        check_number(parameters, "duration_seconds", 0.0..=f64::MAX)?;
        check_number(parameters, "protection_threshold", f64::MIN..=f64::MAX)?;
        if let Some(raw) = parameters.get("waypoints") {
            serde_json::from_value::<Vec<Destination>>(raw.clone())
                .map_err(|e| format!("'waypoints': {e}"))?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError> {
        let Some(target) = step.param_str("target") else {
            return Ok(StepResult::Failure(StepFailure::permanent(
                FailureReason::ProtectionThresholdBreached,
                format!("step {} has no 'target'", step.id),
            )));
        };
        let actor = actor_of(step, &self.default_actor);
        let threshold = step
            .param_f64("protection_threshold")
            .unwrap_or(self.protection_threshold);

        let snapshot = env.snapshot_target(target).await?;
        if snapshot.state_value < threshold {
            return Ok(StepResult::failure(
                FailureReason::ProtectionThresholdBreached,
                format!(
                    "'{target}' dropped to {:.2} (threshold {threshold:.2})",
                    snapshot.state_value
                ),
            ));
        }

        for threat in &snapshot.threats {
            tracing::debug!(target_id = target, threat = %threat.id, "mitigating threat");
            env.mitigate_threat(actor, target, threat).await?;
        }

        let waypoints = Self::waypoints(step);
        let mut reached = ctx
            .scratch
            .get(WAYPOINT)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if let Some(next) = waypoints.get(reached) {
            match env.move_to(actor, next).await? {
                Movement::Arrived => {
                    reached += 1;
                    ctx.scratch.insert(WAYPOINT.to_string(), Value::from(reached));
                }
                Movement::Moving { .. } => {}
                Movement::NoRoute { detail, permanent } => {
                    let failure = if permanent {
                        StepFailure::permanent(FailureReason::RouteUnavailable, detail)
                    } else {
                        StepFailure::new(FailureReason::RouteUnavailable, detail)
                    };
                    return Ok(StepResult::Failure(failure));
                }
            }
        }

        let duration_done = Self::duration(step).is_none_or(|d| ctx.elapsed() >= d);
        if duration_done && reached >= waypoints.len() {
            return Ok(StepResult::success(format!(
                "'{target}' kept above {threshold:.2}, {reached} waypoint(s) reached"
            )));
        }
        Ok(StepResult::pending(
            format!(
                "escorting '{target}': {reached}/{} waypoint(s), state {:.2}",
                waypoints.len(),
                snapshot.state_value
            ),
            self.poll_interval,
        ))
    }

    fn default_timeout(&self, step: &Step) -> Option<Duration> {
        Self::duration(step).map(|d| d + self.grace)
    }
}
