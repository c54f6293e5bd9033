//! Shared access to the environment.
//!
//! Many tasks run at once against one environment. Mutating calls are
//! serialized per actor (two tasks must never steer the same actor at the
//! same time); read-only calls go straight through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Condition, Destination, TargetSnapshot, Threat};
use crate::evaluator;
use crate::ports::{EnvError, EnvironmentContext, Movement, ResourceUse};

/// Exclusive locks keyed by actor identity.
///
/// An actor's entry lives only while someone holds or waits for its lock.
#[derive(Default)]
pub struct ActorLocks {
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
    contention: AtomicU64,
}

impl ActorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `actor`.
    pub async fn acquire(&self, actor: &str) -> ActorGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(actor.to_string()).or_default())
        };
        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.contention.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(actor, "waiting for actor lock");
                lock.lock_owned().await
            }
        };
        ActorGuard {
            locks: self,
            actor: actor.to_string(),
            guard: Some(guard),
        }
    }

    /// How many acquisitions had to wait for another holder.
    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Actors with a live lock entry.
    pub fn tracked_actors(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop the entry for `actor` once the map holds the only reference.
    fn release(&self, actor: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(actor)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(actor);
        }
    }
}

/// Exclusive use of one actor; released on drop.
pub struct ActorGuard<'a> {
    locks: &'a ActorLocks,
    actor: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ActorGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.actor);
    }
}

/// The environment as handlers see it.
#[derive(Clone)]
pub struct SharedEnvironment {
    inner: Arc<dyn EnvironmentContext>,
    locks: Arc<ActorLocks>,
}

impl SharedEnvironment {
    pub fn new(inner: Arc<dyn EnvironmentContext>) -> Self {
        Self {
            inner,
            locks: Arc::new(ActorLocks::new()),
        }
    }

    pub fn locks(&self) -> &ActorLocks {
        &self.locks
    }

    /// Evaluate a condition (snapshot-based or delegated).
    pub async fn evaluate(&self, condition: &Condition) -> Result<bool, EnvError> {
        evaluator::evaluate(condition, self.inner.as_ref()).await
    }

    pub async fn snapshot_target(&self, target_id: &str) -> Result<TargetSnapshot, EnvError> {
        self.inner.snapshot_target(target_id).await
    }

    pub async fn move_to(&self, actor: &str, destination: &Destination) -> Result<Movement, EnvError> {
        let _guard = self.locks.acquire(actor).await;
        self.inner.move_to(actor, destination).await
    }

    pub async fn use_resource(
        &self,
        actor: &str,
        resource_id: &str,
        context: &Value,
    ) -> Result<ResourceUse, EnvError> {
        let _guard = self.locks.acquire(actor).await;
        self.inner.use_resource(actor, resource_id, context).await
    }

    pub async fn mitigate_threat(
        &self,
        actor: &str,
        target_id: &str,
        threat: &Threat,
    ) -> Result<(), EnvError> {
        let _guard = self.locks.acquire(actor).await;
        self.inner.mitigate_threat(actor, target_id, threat).await
    }
}
