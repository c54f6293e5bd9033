mod common;

use std::sync::Arc;
use std::time::Duration;

use errand_core::EngineConfig;
use errand_core::domain::{FailureReason, LifecycleState, LogEvent, RetryPolicy, StepList, TaskId};
use errand_core::impls::{InMemoryEnvironment, Operation};
use serde_json::Value;
use tokio::time::Instant;

use common::{engine, travel, wait_flag, world};

#[tokio::test(start_paused = true)]
async fn cancel_mid_wait_stops_within_one_tick() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let steps = StepList::new(vec![
        wait_flag("s1", "gate", "closed"),
        wait_flag("s2", "gate", "open"),
    ]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let waiting = engine.get_state(&id).await.unwrap();
    assert_eq!(waiting.lifecycle_state, LifecycleState::Waiting);
    assert!(waiting.active_condition.is_some());
    let polls = env.call_count(Operation::CheckCondition).await;

    let requested = Instant::now();
    assert!(engine.cancel_task(&id).await);
    let state = engine.wait_for(&id).await.unwrap();
    assert!(requested.elapsed() < engine.config().engine.poll_interval());

    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert!(state.active_condition.is_none());
    assert_eq!(state.events(LogEvent::Cancelled).count(), 1);
    let last = state.last_failure.as_ref().unwrap();
    assert_eq!(last.reason, FailureReason::Cancelled);
    assert_eq!(last.step_id.as_ref().unwrap().as_str(), "s1");
    assert!(state.failed_steps.is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(env.call_count(Operation::CheckCondition).await, polls);
    assert_eq!(engine.get_state(&id).await.unwrap(), state);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let id = TaskId::new("t");
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(10),
        ..RetryPolicy::default()
    };
    let steps = StepList::new(vec![travel("s1", "washed_out_bridge").with_retry(policy)]);

    engine.start_task(id.clone(), steps, Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        engine.get_state(&id).await.unwrap().lifecycle_state,
        LifecycleState::Retrying
    );

    assert!(engine.cancel_task(&id).await);
    let state = engine.wait_for(&id).await.unwrap();
    assert_eq!(state.lifecycle_state, LifecycleState::Failed);
    assert_eq!(state.last_failure.unwrap().reason, FailureReason::Cancelled);
    assert_eq!(env.call_count(Operation::MoveTo).await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_one_task_leaves_others_running() {
    let env = Arc::new(InMemoryEnvironment::from_spec(world()));
    let engine = engine(&env, EngineConfig::default());
    let doomed = TaskId::new("doomed");
    let survivor = TaskId::new("survivor");

    engine
        .start_task(
            doomed.clone(),
            StepList::new(vec![wait_flag("s1", "gate", "closed")]),
            Value::Null,
        )
        .await
        .unwrap();
    engine
        .start_task(
            survivor.clone(),
            StepList::new(vec![
                wait_flag("s1", "gate", "open"),
                travel("s2", "market"),
            ]),
            Value::Null,
        )
        .await
        .unwrap();

    assert!(engine.cancel_task(&doomed).await);
    assert_eq!(
        engine.wait_for(&doomed).await.unwrap().lifecycle_state,
        LifecycleState::Failed
    );
    assert_eq!(
        engine.wait_for(&survivor).await.unwrap().lifecycle_state,
        LifecycleState::Completed
    );
}
