//! Impls: concrete pieces behind the ports.
//!
//! - **SharedEnvironment**: per-actor locking around any `EnvironmentContext`
//! - **InMemoryEnvironment**: scriptable environment for the CLI and tests
//!
//! Real environments (game clients, device controllers, CI runners) live in
//! the crates that embed the engine.

pub mod memory_env;
pub mod shared;

pub use self::memory_env::{
    ConditionValue, EffectSpec, EnvCall, InMemoryEnvironment, Operation, ResourceSpec, RouteSpec,
    WorldSpec,
};
pub use self::shared::{ActorGuard, ActorLocks, SharedEnvironment};
