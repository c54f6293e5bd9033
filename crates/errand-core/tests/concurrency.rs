mod common;

use std::sync::Arc;
use std::time::Duration;

use errand_core::EngineConfig;
use errand_core::domain::{LifecycleState, StepList, TaskId};
use errand_core::impls::{InMemoryEnvironment, Operation, RouteSpec, WorldSpec};
use serde_json::Value;

use common::{engine, travel};

fn slow_world() -> WorldSpec {
    WorldSpec::default()
        .with_route("north_gate", RouteSpec { ticks: 3, blocked: None })
        .with_route("south_gate", RouteSpec { ticks: 3, blocked: None })
        .with_latency(Duration::from_millis(100))
}

#[tokio::test(start_paused = true)]
async fn tasks_sharing_an_actor_never_overlap() {
    let env = Arc::new(InMemoryEnvironment::from_spec(slow_world()));
    let engine = engine(&env, EngineConfig::default());
    let north = TaskId::new("north");
    let south = TaskId::new("south");

    for (id, gate) in [(&north, "north_gate"), (&south, "south_gate")] {
        engine
            .start_task(
                id.clone(),
                StepList::new(vec![travel("go", gate)]),
                Value::Null,
            )
            .await
            .unwrap();
    }

    for id in [&north, &south] {
        let state = engine.wait_for(id).await.unwrap();
        assert_eq!(state.lifecycle_state, LifecycleState::Completed);
    }

    assert_eq!(env.max_concurrency("player").await, 1);
    assert!(engine.environment().locks().contention_count() > 0);
    assert_eq!(env.call_count(Operation::MoveTo).await, 8);
}

#[tokio::test(start_paused = true)]
async fn different_actors_do_not_contend() {
    let env = Arc::new(InMemoryEnvironment::from_spec(slow_world()));
    let engine = engine(&env, EngineConfig::default());
    let scout = TaskId::new("scout");
    let porter = TaskId::new("porter");

    engine
        .start_task(
            scout.clone(),
            StepList::new(vec![travel("go", "north_gate").with_param("actor", "scout")]),
            Value::Null,
        )
        .await
        .unwrap();
    engine
        .start_task(
            porter.clone(),
            StepList::new(vec![travel("go", "south_gate").with_param("actor", "porter")]),
            Value::Null,
        )
        .await
        .unwrap();

    for id in [&scout, &porter] {
        assert_eq!(
            engine.wait_for(id).await.unwrap().lifecycle_state,
            LifecycleState::Completed
        );
    }

    assert_eq!(engine.environment().locks().contention_count(), 0);
    assert_eq!(env.actor_place("scout").await.as_deref(), Some("north_gate"));
    assert_eq!(env.actor_place("porter").await.as_deref(), Some("south_gate"));
}
