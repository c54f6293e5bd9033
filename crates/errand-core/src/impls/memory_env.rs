//! InMemoryEnvironment: a scriptable, deterministic environment.
//!
//! Used by the CLI (`errand run --world world.json`) and by tests. The world
//! is described by a `WorldSpec`; tests can also mutate it while tasks run.
//!
//! Besides answering calls it records them (`calls`) and tracks how many
//! mutating calls were in flight per actor at once (`max_concurrency`), which
//! is how the per-actor locking is observed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{Condition, Destination, Position, TargetSnapshot, Threat, TriggerType};
use crate::ports::{EnvError, EnvironmentContext, Movement, ResourceUse};

/// Environment operations, for scripted failures and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CheckCondition,
    MoveTo,
    UseResource,
    SnapshotTarget,
    MitigateThreat,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvCall {
    pub operation: Operation,
    pub actor: Option<String>,
    pub subject: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSpec {
    /// `move_to` answers `Moving` this many times before `Arrived`.
    pub ticks: u32,

    /// `Some(permanent)` blocks the route.
    pub blocked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub available: bool,

    /// Remaining uses; `None` is unlimited.
    pub uses: Option<u32>,

    pub effect: Option<EffectSpec>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            available: true,
            uses: None,
            effect: None,
        }
    }
}

/// What using a resource does to a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSpec {
    pub target: String,
    pub set_flag: Option<String>,
    pub clear_flag: Option<String>,
    pub set_state: Option<f64>,
}

/// A delegated condition with a fixed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionValue {
    pub condition: Condition,
    pub value: bool,
}

/// Initial world description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSpec {
    pub targets: Vec<TargetSnapshot>,
    pub locations: HashMap<String, Position>,
    pub actors: HashMap<String, Position>,
    pub routes: HashMap<String, RouteSpec>,
    pub resources: HashMap<String, ResourceSpec>,
    pub conditions: Vec<ConditionValue>,

    /// Calls of each operation that fail with `EnvError::Unavailable` before
    /// the operation starts answering.
    pub failures: HashMap<Operation, u32>,

    /// Simulated duration of every mutating call.
    pub latency_ms: u64,
}

impl WorldSpec {
    pub fn with_target(mut self, target: TargetSnapshot) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_location(mut self, name: impl Into<String>, position: Position) -> Self {
        self.locations.insert(name.into(), position);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>, position: Position) -> Self {
        self.actors.insert(actor.into(), position);
        self
    }

    pub fn with_route(mut self, destination: impl Into<String>, route: RouteSpec) -> Self {
        self.routes.insert(destination.into(), route);
        self
    }

    pub fn with_resource(mut self, id: impl Into<String>, resource: ResourceSpec) -> Self {
        self.resources.insert(id.into(), resource);
        self
    }

    pub fn with_condition(mut self, condition: Condition, value: bool) -> Self {
        self.conditions.push(ConditionValue { condition, value });
        self
    }

    pub fn with_failures(mut self, operation: Operation, count: u32) -> Self {
        self.failures.insert(operation, count);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }
}

#[derive(Default)]
struct World {
    targets: HashMap<String, TargetSnapshot>,
    locations: HashMap<String, Position>,
    actor_positions: HashMap<String, Position>,
    actor_places: HashMap<String, String>,
    routes: HashMap<String, RouteSpec>,
    progress: HashMap<(String, String), u32>,
    resources: HashMap<String, ResourceSpec>,
    conditions: HashMap<String, bool>,
    failures: HashMap<Operation, u32>,
    calls: Vec<EnvCall>,
    in_flight: HashMap<String, u32>,
    max_in_flight: HashMap<String, u32>,
}

impl World {
    fn record(&mut self, operation: Operation, actor: Option<&str>, subject: &str) {
        self.calls.push(EnvCall {
            operation,
            actor: actor.map(str::to_string),
            subject: subject.to_string(),
        });
    }

    fn injected_failure(&mut self, operation: Operation) -> Result<(), EnvError> {
        match self.failures.get_mut(&operation) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(EnvError::Unavailable(format!("scripted {operation:?} failure")))
            }
            _ => Ok(()),
        }
    }

    fn snapshot(&self, target_id: &str) -> Option<TargetSnapshot> {
        if let Some(target) = self.targets.get(target_id) {
            let mut snapshot = target.clone();
            if let Some(position) = self.actor_positions.get(target_id) {
                snapshot.position = Some(*position);
            }
            return Some(snapshot);
        }
        self.actor_positions
            .get(target_id)
            .map(|p| TargetSnapshot::new(target_id, 1.0).with_position(*p))
    }

    fn target_mut(&mut self, target_id: &str) -> &mut TargetSnapshot {
        self.targets
            .entry(target_id.to_string())
            .or_insert_with(|| TargetSnapshot::new(target_id, 1.0))
    }
}

fn condition_key(condition: &Condition) -> String {
    format!(
        "{}|{}|{}",
        condition.trigger_type,
        condition.target,
        Value::Object(condition.predicate_parameters.clone())
    )
}

pub struct InMemoryEnvironment {
    world: Mutex<World>,
    latency: Duration,
}

impl Default for InMemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEnvironment {
    pub fn new() -> Self {
        Self::from_spec(WorldSpec::default())
    }

    pub fn from_spec(spec: WorldSpec) -> Self {
        let world = World {
            targets: spec
                .targets
                .into_iter()
                .map(|t| (t.target_id.clone(), t))
                .collect(),
            locations: spec.locations,
            actor_positions: spec.actors,
            routes: spec.routes,
            resources: spec.resources,
            conditions: spec
                .conditions
                .iter()
                .map(|c| (condition_key(&c.condition), c.value))
                .collect(),
            failures: spec.failures,
            ..World::default()
        };
        Self {
            world: Mutex::new(world),
            latency: Duration::from_millis(spec.latency_ms),
        }
    }

    pub async fn put_target(&self, target: TargetSnapshot) {
        let mut world = self.world.lock().await;
        world.targets.insert(target.target_id.clone(), target);
    }

    pub async fn set_state_value(&self, target_id: &str, value: f64) {
        self.world.lock().await.target_mut(target_id).state_value = value;
    }

    pub async fn add_threat(&self, target_id: &str, threat: Threat) {
        self.world.lock().await.target_mut(target_id).threats.push(threat);
    }

    pub async fn set_condition(&self, condition: &Condition, value: bool) {
        let mut world = self.world.lock().await;
        world.conditions.insert(condition_key(condition), value);
    }

    pub async fn set_route(&self, destination: impl Into<String>, route: RouteSpec) {
        let mut world = self.world.lock().await;
        world.routes.insert(destination.into(), route);
    }

    pub async fn set_resource(&self, id: impl Into<String>, resource: ResourceSpec) {
        let mut world = self.world.lock().await;
        world.resources.insert(id.into(), resource);
    }

    /// Make the next `count` calls of `operation` fail as unavailable.
    pub async fn fail_next(&self, operation: Operation, count: u32) {
        let mut world = self.world.lock().await;
        world.failures.insert(operation, count);
    }

    pub async fn target(&self, target_id: &str) -> Option<TargetSnapshot> {
        self.world.lock().await.snapshot(target_id)
    }

    pub async fn actor_place(&self, actor: &str) -> Option<String> {
        self.world.lock().await.actor_places.get(actor).cloned()
    }

    pub async fn calls(&self) -> Vec<EnvCall> {
        self.world.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: Operation) -> usize {
        let world = self.world.lock().await;
        world.calls.iter().filter(|c| c.operation == operation).count()
    }

    /// Highest number of mutating calls that were in flight for `actor` at
    /// the same time.
    pub async fn max_concurrency(&self, actor: &str) -> u32 {
        let world = self.world.lock().await;
        world.max_in_flight.get(actor).copied().unwrap_or(0)
    }

    async fn enter(&self, actor: &str) {
        let mut world = self.world.lock().await;
        let in_flight = world.in_flight.entry(actor.to_string()).or_default();
        *in_flight += 1;
        let now = *in_flight;
        let max = world.max_in_flight.entry(actor.to_string()).or_default();
        *max = (*max).max(now);
    }

    async fn leave(&self, actor: &str) {
        let mut world = self.world.lock().await;
        if let Some(in_flight) = world.in_flight.get_mut(actor) {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    /// Mutating calls take `latency` between entering and taking effect.
    async fn mutate<T>(
        &self,
        operation: Operation,
        actor: &str,
        subject: &str,
        apply: impl FnOnce(&mut World) -> Result<T, EnvError>,
    ) -> Result<T, EnvError> {
        {
            let mut world = self.world.lock().await;
            world.record(operation, Some(actor), subject);
            world.injected_failure(operation)?;
        }
        self.enter(actor).await;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = {
            let mut world = self.world.lock().await;
            apply(&mut *world)
        };
        self.leave(actor).await;
        result
    }
}

#[async_trait]
impl EnvironmentContext for InMemoryEnvironment {
    async fn check_condition(&self, condition: &Condition) -> Result<bool, EnvError> {
        let mut world = self.world.lock().await;
        world.record(Operation::CheckCondition, None, &condition.to_string());
        world.injected_failure(Operation::CheckCondition)?;

        match &condition.trigger_type {
            TriggerType::AtLocation => {
                let location = condition
                    .string("location")
                    .ok_or_else(|| EnvError::Rejected("at_location needs 'location'".into()))?;
                Ok(world.actor_places.get(&condition.target).map(String::as_str) == Some(location))
            }
            TriggerType::ResourceAvailable => Ok(world
                .resources
                .get(&condition.target)
                .is_some_and(|r| r.available && r.uses != Some(0))),
            trigger if trigger.is_snapshot_based() => {
                let snapshot = world.snapshot(&condition.target).ok_or_else(|| {
                    EnvError::Rejected(format!("unknown target '{}'", condition.target))
                })?;
                condition
                    .evaluate_snapshot(&snapshot)
                    .map_err(|e| EnvError::Rejected(e.to_string()))
            }
            _ => Ok(world
                .conditions
                .get(&condition_key(condition))
                .copied()
                .unwrap_or(false)),
        }
    }

    async fn move_to(&self, actor: &str, destination: &Destination) -> Result<Movement, EnvError> {
        let key = destination.to_string();
        self.mutate(Operation::MoveTo, actor, &key, |world| {
            let route = world.routes.get(&key).cloned().unwrap_or_default();
            if let Some(permanent) = route.blocked {
                return Ok(Movement::NoRoute {
                    detail: format!("route to {key} is blocked"),
                    permanent,
                });
            }

            let progress = world
                .progress
                .entry((actor.to_string(), key.clone()))
                .or_default();
            if *progress < route.ticks {
                *progress += 1;
                let remaining = f64::from(route.ticks - *progress + 1);
                return Ok(Movement::Moving {
                    remaining: Some(remaining),
                });
            }

            world.progress.remove(&(actor.to_string(), key.clone()));
            match destination {
                Destination::Named(name) => {
                    world.actor_places.insert(actor.to_string(), name.clone());
                    if let Some(position) = world.locations.get(name).copied() {
                        world.actor_positions.insert(actor.to_string(), position);
                    }
                }
                Destination::Point(position) => {
                    world.actor_places.remove(actor);
                    world.actor_positions.insert(actor.to_string(), *position);
                }
            }
            Ok(Movement::Arrived)
        })
        .await
    }

    async fn use_resource(
        &self,
        actor: &str,
        resource_id: &str,
        _context: &Value,
    ) -> Result<ResourceUse, EnvError> {
        self.mutate(Operation::UseResource, actor, resource_id, |world| {
            let Some(resource) = world.resources.get_mut(resource_id) else {
                return Ok(ResourceUse::Unavailable {
                    detail: format!("no resource '{resource_id}'"),
                    permanent: true,
                });
            };
            if resource.uses == Some(0) {
                return Ok(ResourceUse::Unavailable {
                    detail: format!("resource '{resource_id}' is used up"),
                    permanent: true,
                });
            }
            if !resource.available {
                return Ok(ResourceUse::Unavailable {
                    detail: format!("resource '{resource_id}' is not usable right now"),
                    permanent: false,
                });
            }
            if let Some(uses) = resource.uses.as_mut() {
                *uses -= 1;
            }

            if let Some(effect) = resource.effect.clone() {
                let target = world.target_mut(&effect.target);
                if let Some(flag) = effect.set_flag {
                    target.flags.insert(flag);
                }
                if let Some(flag) = effect.clear_flag {
                    target.flags.remove(&flag);
                }
                if let Some(state) = effect.set_state {
                    target.state_value = state;
                }
            }
            Ok(ResourceUse::Applied)
        })
        .await
    }

    async fn snapshot_target(&self, target_id: &str) -> Result<TargetSnapshot, EnvError> {
        let mut world = self.world.lock().await;
        world.record(Operation::SnapshotTarget, None, target_id);
        world.injected_failure(Operation::SnapshotTarget)?;
        world
            .snapshot(target_id)
            .ok_or_else(|| EnvError::Rejected(format!("unknown target '{target_id}'")))
    }

    async fn mitigate_threat(
        &self,
        actor: &str,
        target_id: &str,
        threat: &Threat,
    ) -> Result<(), EnvError> {
        self.mutate(Operation::MitigateThreat, actor, target_id, |world| {
            let target = world.target_mut(target_id);
            target.threats.retain(|t| t.id != threat.id);
            Ok(())
        })
        .await
    }
}
