//! Retry, backoff and fallback behavior of whole tasks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use errand_core::EngineBuilder;
use errand_core::EngineConfig;
use errand_core::config::SpliceMode;
use errand_core::domain::{
    FailureReason, LifecycleState, LogEvent, RetryPolicy, Step, StepFailure, StepList, StepResult,
    TaskId,
};
use errand_core::handlers::{SharedEnvironment, StepContext, StepHandler};
use errand_core::impls::{InMemoryEnvironment, Operation, ResourceSpec};
use errand_core::ports::EnvError;
use serde_json::Value;

use common::{engine, travel, wait_flag, world};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    }
}

#[tokio::test(start_paused = true)]
async fn failed_resource_falls_back_to_alternate_route() {
    let env = Arc::new(InMemoryEnvironment::from_spec(
        world().with_resource("key", ResourceSpec::default()),
    ));
    env.fail_next(Operation::UseResource, 1).await;
    let engine = common::engine(&env, EngineConfig::default());

    let task_id = engine
        .start_template(
            r#"{
                "task_id": "door",
                "steps": [{
                    "id": "s1",
                    "type": "use_resource",
                    "parameters": {"resource_id": "key"},
                    "retry_policy": {"max_attempts": 1},
                    "fallback": [{"id": "s1b", "type": "travel_to", "parameters": {"destination": "alt_door"}}]
                }]
            }"#,
            Value::Null,
        )
        .await
        .unwrap();

    let state = engine.wait_for(&task_id).await.unwrap();
    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(state.fallback_depth, 1);
    assert_eq!(
        state.completed_steps.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["s1b"]
    );
    assert_eq!(state.plan.iter().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["s1b"]);
    assert_eq!(env.actor_place("player").await.as_deref(), Some("alt_door"));

    let events: Vec<LogEvent> = state.log.iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![
            LogEvent::TaskStarted,
            LogEvent::StepStarted,
            LogEvent::StepFailed,
            LogEvent::FallbackSelected,
            LogEvent::StepStarted,
            LogEvent::StepSucceeded,
            LogEvent::TaskCompleted,
        ]
    );
    let failed = state.events(LogEvent::StepFailed).next().unwrap();
    assert_eq!(failed.reason, Some(FailureReason::EnvironmentUnavailable));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fall_back_exactly_once() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![
        travel("s1", "washed_out_bridge")
            .with_retry(policy(2))
            .with_fallback(vec![wait_flag("s1b", "gate", "open")]),
        wait_flag("s2", "gate", "open"),
    ]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(env.call_count(Operation::MoveTo).await, 2);
    assert_eq!(state.events(LogEvent::RetryScheduled).count(), 1);
    assert_eq!(state.events(LogEvent::FallbackSelected).count(), 1);
    assert_eq!(state.fallback_depth, 1);
    assert_eq!(state.retry_count, 0);
    assert!(state.completed_steps.contains("s1b"));
    assert!(!state.completed_steps.contains("s2"));
    assert_eq!(state.plan.iter().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["s1b"]);
    assert!(state.failed_steps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_attempts_without_fallback_fails_on_first_failure() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![
        travel("s1", "washed_out_bridge").with_retry(policy(0)),
        wait_flag("s2", "gate", "open"),
    ]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(env.call_count(Operation::MoveTo).await, 1);
    assert_eq!(state.events(LogEvent::RetryScheduled).count(), 0);
    assert!(state.failed_steps.contains("s1"));
    assert!(!state.completed_steps.contains("s2"));
    assert_eq!(state.current_step_index, 0);
    let last = state.last_failure.unwrap();
    assert_eq!(last.reason, FailureReason::RouteUnavailable);
    assert_eq!(last.step_id.unwrap().as_str(), "s1");
}

#[tokio::test(start_paused = true)]
async fn permanent_route_failure_is_not_retried() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![travel("s1", "collapsed_tunnel").with_retry(policy(5))]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(env.call_count(Operation::MoveTo).await, 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_retries() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![travel("s1", "washed_out_bridge").with_retry(policy(4))]);

    let started = tokio::time::Instant::now();
    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.retry_count, 3);
    assert_eq!(env.call_count(Operation::MoveTo).await, 4);
    // 1s + 2s + 4s of backoff.
    assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
}

/// Refuses every retry and reads a target on each tick.
struct NeverRetry;

#[async_trait]
impl StepHandler for NeverRetry {
    async fn execute(
        &self,
        _step: &Step,
        env: &SharedEnvironment,
        _ctx: &mut StepContext,
    ) -> Result<StepResult, EnvError> {
        env.snapshot_target("gate").await?;
        Ok(StepResult::success("gate seen"))
    }

    fn should_retry(&self, _: &Step, _: &RetryPolicy, _: u32, _: &StepFailure) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn environment_errors_are_retried_despite_handler_veto() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    env.fail_next(Operation::SnapshotTarget, 2).await;
    let engine = EngineBuilder::default()
        .register("look", Arc::new(NeverRetry))
        .unwrap()
        .environment(env.clone())
        .build()
        .unwrap();
    let id = TaskId::new("t");
    let steps = StepList::new(vec![Step::new("s1", "look").with_retry(policy(3))]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(state.events(LogEvent::RetryScheduled).count(), 2);
    assert_eq!(env.call_count(Operation::SnapshotTarget).await, 3);
}

fn escalating_plan() -> StepList {
    StepList::new(vec![
        travel("s1", "collapsed_tunnel")
            .with_fallback(vec![travel("a1", "collapsed_tunnel"), wait_flag("a2", "gate", "open")])
            .with_fallback(vec![wait_flag("b1", "gate", "open")]),
    ])
}

#[tokio::test(start_paused = true)]
async fn failing_branch_escalates_to_next_branch() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");

    engine.start_task(id.clone(), escalating_plan(), Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(state.fallback_depth, 2);
    assert_eq!(state.plan.iter().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["b1"]);
    assert!(state.completed_steps.contains("b1"));
    assert!(!state.completed_steps.contains("a2"));
}

#[tokio::test(start_paused = true)]
async fn escalation_can_be_turned_off() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let mut config = EngineConfig::default();
    config.engine.fallback_escalation = false;
    let engine = engine(&env, config);
    let id = TaskId::new("t");

    engine.start_task(id.clone(), escalating_plan(), Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.fallback_depth, 1);
    assert!(state.failed_steps.contains("a1"));
}

#[tokio::test(start_paused = true)]
async fn runtime_depth_limit_stops_nested_fallbacks() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let mut config = EngineConfig::default();
    config.engine.max_fallback_depth = 1;
    let engine = engine(&env, config);
    let id = TaskId::new("t");
    let steps = StepList::new(vec![travel("s1", "collapsed_tunnel").with_fallback(vec![
        travel("a", "collapsed_tunnel").with_fallback(vec![wait_flag("a_inner", "gate", "open")]),
    ])]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.fallback_depth, 1);
    assert!(state.failed_steps.contains("a"));
    assert!(!state.completed_steps.contains("a_inner"));
}

fn primary_then_follow_up() -> StepList {
    StepList::new(vec![
        travel("s1", "collapsed_tunnel")
            .with_retry(policy(0))
            .with_fallback(vec![wait_flag("s1b", "gate", "open")]),
        travel("s2", "market"),
    ])
}

#[tokio::test(start_paused = true)]
async fn fallback_branch_replaces_remaining_primary_steps() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");

    engine.start_task(id.clone(), primary_then_follow_up(), Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(state.plan.iter().map(|id| id.as_str()).collect::<Vec<_>>(), vec!["s1b"]);
    assert!(state.completed_steps.contains("s1b"));
    assert!(!state.completed_steps.contains("s2"));
    assert_eq!(env.call_count(Operation::MoveTo).await, 1);
    assert_eq!(env.actor_place("player").await, None);
}

#[tokio::test(start_paused = true)]
async fn replace_step_mode_keeps_later_primary_steps() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let mut config = EngineConfig::default();
    config.engine.splice_mode = SpliceMode::ReplaceStep;
    let engine = engine(&env, config);
    let id = TaskId::new("t");

    engine.start_task(id.clone(), primary_then_follow_up(), Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    assert_eq!(
        state.plan.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["s1b", "s2"]
    );
    assert!(state.completed_steps.contains("s2"));
    assert_eq!(env.actor_place("player").await.as_deref(), Some("market"));
}

#[tokio::test(start_paused = true)]
async fn malformed_condition_in_code_built_step_is_not_retried() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![
        Step::new("s1", "wait_for_condition")
            .with_param(
                "condition",
                serde_json::json!({"trigger_type": "state_at_least", "target": "gate"}),
            )
            .with_retry(policy(5)),
    ]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.events(LogEvent::RetryScheduled).count(), 0);
    assert_eq!(state.last_failure.unwrap().reason, FailureReason::InvalidParameter);
    assert_eq!(env.call_count(Operation::SnapshotTarget).await, 0);
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_with_condition_timeout() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![
        wait_flag("s1", "gate", "closed")
            .with_timeout(Duration::from_secs(5))
            .with_retry(policy(0)),
    ]);

    let started = tokio::time::Instant::now();
    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    let state = engine.wait_for(&id).await.unwrap();

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.last_failure.as_ref().unwrap().reason, FailureReason::ConditionTimeout);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(state.events(LogEvent::Waiting).count() >= 1);
}
