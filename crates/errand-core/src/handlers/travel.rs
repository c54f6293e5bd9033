//! `travel_to`: move an actor to a destination and verify arrival.
//!
//! Parameters:
//! - `destination` (required): a named place or `{x, y, z}`
//! - `tolerance`: arrival radius for coordinate destinations
//! - `actor`: who travels (defaults to the configured actor)
//!
//! Named places are verified with an `at_location` check; coordinates with
//! the actor's snapshot position.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    Condition, Destination, FailureReason, Parameters, Step, StepFailure, StepResult,
};
use crate::ports::{EnvError, Movement};

use super::{SharedEnvironment, StepContext, StepHandler, actor_of, check_number, typed_param};

pub struct TravelTo {
    default_actor: String,
    tolerance: f64,
    poll_interval: Duration,
}

impl TravelTo {
    pub fn new(default_actor: impl Into<String>, tolerance: f64, poll_interval: Duration) -> Self {
        Self {
            default_actor: default_actor.into(),
            tolerance,
            poll_interval,
        }
    }

    async fn arrived(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        actor: &str,
        destination: &Destination,
    ) -> Result<bool, EnvError> {
        match destination {
            Destination::Named(place) => {
                env.evaluate(&Condition::at_location(actor, place.as_str()))
                    .await
            }
            Destination::Point(point) => {
                let tolerance = step.param_f64("tolerance").unwrap_or(self.tolerance);
                let snapshot = env.snapshot_target(actor).await?;
                Ok(snapshot
                    .position
                    .is_some_and(|p| p.distance_to(point) <= tolerance))
            }
        }
    }
}

#[async_trait]
impl StepHandler for TravelTo {
    fn required_parameters(&self) -> &'static [&'static str] {
        &["destination"]
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<(), String> {
        let raw = parameters.get("destination").cloned().unwrap_or_default();
        let destination: Destination =
            serde_json::from_value(raw).map_err(|e| format!("'destination': {e}"))?;
        if let Destination::Named(name) = &destination
            && name.trim().is_empty()
        {
            return Err("'destination' must not be empty".to_string());
        }
        check_number(parameters, "tolerance", 0.0..=f64::MAX)
    }

    async fn execute(
        &self,
        step: &Step,
        env: &SharedEnvironment,
        ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError> {
        let destination: Destination =
            match typed_param(step, "destination", FailureReason::RouteUnavailable) {
                Ok(destination) => destination,
                Err(failure) => return Ok(StepResult::Failure(failure)),
            };
        let actor = actor_of(step, &self.default_actor);

        let movement = env.move_to(actor, &destination).await?;
        if let Movement::NoRoute { detail, permanent } = movement {
            let failure = if permanent {
                StepFailure::permanent(FailureReason::RouteUnavailable, detail)
            } else {
                StepFailure::new(FailureReason::RouteUnavailable, detail)
            };
            return Ok(StepResult::Failure(failure));
        }

        if movement == Movement::Arrived && self.arrived(step, env, actor, &destination).await? {
            return Ok(StepResult::success(format!("{actor} arrived at {destination}")));
        }
        if ctx.timed_out() {
            return Ok(StepResult::Failure(StepFailure::new(
                FailureReason::ArrivalTimeout,
                format!("{actor} did not reach {destination} within {:?}", ctx.timeout),
            )));
        }

        let detail = match movement {
            Movement::Moving {
                remaining: Some(left),
            } => format!("{actor} moving to {destination} ({left} left)"),
            Movement::Moving { remaining: None } => format!("{actor} moving to {destination}"),
            _ => format!("{actor} reported arrival at {destination}, not confirmed yet"),
        };
        Ok(StepResult::pending(detail, self.poll_interval))
    }

    async fn check_success(&self, step: &Step, env: &SharedEnvironment) -> Result<bool, EnvError> {
        match step.param_as::<Destination>("destination") {
            Ok(Some(destination)) => {
                let actor = actor_of(step, &self.default_actor);
                self.arrived(step, env, actor, &destination).await
            }
            _ => Ok(false),
        }
    }

    fn timeout_reason(&self) -> FailureReason {
        FailureReason::ArrivalTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Position, RetryPolicy};
    use crate::handlers::testing::{context, world};
    use crate::impls::{RouteSpec, WorldSpec};
    use serde_json::json;

    fn handler() -> TravelTo {
        TravelTo::new("player", 1.5, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn arrives_at_named_place() {
        let (env, shared) = world(WorldSpec::default());
        let step = Step::new("go", "travel_to").with_param("destination", "alt_door");
        let mut ctx = context(Duration::from_secs(10));

        let result = handler().execute(&step, &shared, &mut ctx).await.unwrap();
        assert!(result.is_success(), "{result:?}");
        assert_eq!(env.actor_place("player").await.as_deref(), Some("alt_door"));
        assert!(handler().check_success(&step, &shared).await.unwrap());
    }

    #[tokio::test]
    async fn keeps_polling_while_moving() {
        let (_env, shared) = world(
            WorldSpec::default().with_route("camp", RouteSpec { ticks: 1, blocked: None }),
        );
        let step = Step::new("go", "travel_to")
            .with_param("destination", "camp")
            .with_param("actor", "companion");
        let mut ctx = context(Duration::from_secs(10));

        let first = handler().execute(&step, &shared, &mut ctx).await.unwrap();
        assert!(matches!(first, StepResult::Pending { .. }));
        let second = handler().execute(&step, &shared, &mut ctx).await.unwrap();
        assert!(second.is_success());
    }

    #[tokio::test]
    async fn coordinate_arrival_uses_tolerance() {
        let (_env, shared) =
            world(WorldSpec::default().with_actor("player", Position::new(0.0, 0.0, 0.0)));
        let step = Step::new("go", "travel_to").with_param("destination", json!({"x": 3.0, "y": 4.0}));
        let mut ctx = context(Duration::from_secs(10));

        let result = handler().execute(&step, &shared, &mut ctx).await.unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn permanent_block_is_not_retried() {
        let (_env, shared) = world(WorldSpec::default().with_route(
            "cliff",
            RouteSpec {
                ticks: 0,
                blocked: Some(true),
            },
        ));
        let step = Step::new("go", "travel_to").with_param("destination", "cliff");
        let mut ctx = context(Duration::from_secs(10));

        let StepResult::Failure(failure) = handler().execute(&step, &shared, &mut ctx).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(failure.reason, FailureReason::RouteUnavailable);
        assert!(!failure.transient);
        assert!(!handler().should_retry(&step, &RetryPolicy::default(), 1, &failure));

        let transient = StepFailure::new(FailureReason::RouteUnavailable, "crowded");
        assert!(handler().should_retry(&step, &RetryPolicy::default(), 1, &transient));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_travel_times_out() {
        let (_env, shared) = world(
            WorldSpec::default().with_route("far", RouteSpec { ticks: 100, blocked: None }),
        );
        let step = Step::new("go", "travel_to").with_param("destination", "far");
        let mut ctx = context(Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(5)).await;

        let StepResult::Failure(failure) = handler().execute(&step, &shared, &mut ctx).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(failure.reason, FailureReason::ArrivalTimeout);
    }

    #[test]
    fn validates_destination_shape() {
        let ok = json!({"destination": {"x": 1.0, "y": 2.0}, "tolerance": 0.5});
        assert!(handler().validate_parameters(ok.as_object().unwrap()).is_ok());

        let bad = json!({"destination": 42});
        assert!(handler().validate_parameters(bad.as_object().unwrap()).is_err());

        let blank = json!({"destination": "  "});
        assert!(handler().validate_parameters(blank.as_object().unwrap()).is_err());
    }
}
