//! Environment Context port.
//!
//! The engine knows nothing about the world it automates (a game client, a
//! device, a CI runner). Collaborators implement this trait; handlers reach it
//! through `SharedEnvironment`, which adds per-actor locking.
//!
//! All calls are awaited one at a time by the handler. `EnvError` means the
//! call itself could not be carried out (transport failure), as opposed to a
//! logical answer such as `Movement::NoRoute`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Condition, Destination, TargetSnapshot, Threat};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    /// The environment could not be reached or did not answer.
    #[error("environment unavailable: {0}")]
    Unavailable(String),

    /// The environment refused the call (bad arguments, unsupported query).
    #[error("environment rejected the call: {0}")]
    Rejected(String),
}

/// Answer to a `move_to` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Movement {
    /// The actor reports it is at the destination.
    Arrived,

    /// Movement is under way; ask again later.
    Moving {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining: Option<f64>,
    },

    /// No route to the destination. `permanent` routes will never open.
    NoRoute { detail: String, permanent: bool },
}

/// Answer to a `use_resource` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceUse {
    /// The resource's effect was applied.
    Applied,

    /// The resource could not be used. `permanent` means it never will.
    Unavailable { detail: String, permanent: bool },
}

#[async_trait]
pub trait EnvironmentContext: Send + Sync {
    /// Read-only check of a delegated condition.
    async fn check_condition(&self, condition: &Condition) -> Result<bool, EnvError>;

    /// Compute and execute movement of `actor` toward `destination`.
    async fn move_to(&self, actor: &str, destination: &Destination) -> Result<Movement, EnvError>;

    /// Apply the effect of `resource_id`, used by `actor`.
    async fn use_resource(
        &self,
        actor: &str,
        resource_id: &str,
        context: &Value,
    ) -> Result<ResourceUse, EnvError>;

    /// Read-only view of one target.
    async fn snapshot_target(&self, target_id: &str) -> Result<TargetSnapshot, EnvError>;

    /// Counter `threat` around `target_id`, acting as `actor`.
    async fn mitigate_threat(
        &self,
        actor: &str,
        target_id: &str,
        threat: &Threat,
    ) -> Result<(), EnvError>;
}
