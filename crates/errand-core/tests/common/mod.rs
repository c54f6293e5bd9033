#![allow(dead_code)]

use std::sync::Arc;

use errand_core::domain::{Step, TargetSnapshot};
use errand_core::impls::{InMemoryEnvironment, RouteSpec, WorldSpec};
use errand_core::{Engine, EngineBuilder, EngineConfig};
use serde_json::json;

pub fn engine(env: &Arc<InMemoryEnvironment>, config: EngineConfig) -> Engine {
    EngineBuilder::new(config)
        .environment(env.clone())
        .build()
        .expect("engine builds")
}

/// World with an open gate and a few routes.
pub fn world() -> WorldSpec {
    WorldSpec::default()
        .with_target(TargetSnapshot::new("gate", 1.0).with_flag("open"))
        .with_route(
            "washed_out_bridge",
            RouteSpec {
                ticks: 0,
                blocked: Some(false),
            },
        )
        .with_route(
            "collapsed_tunnel",
            RouteSpec {
                ticks: 0,
                blocked: Some(true),
            },
        )
}

pub fn travel(id: &str, destination: &str) -> Step {
    Step::new(id, "travel_to").with_param("destination", destination)
}

pub fn wait_flag(id: &str, target: &str, flag: &str) -> Step {
    Step::new(id, "wait_for_condition").with_param(
        "condition",
        json!({"trigger_type": "flag_set", "target": target, "predicate_parameters": {"flag": flag}}),
    )
}
