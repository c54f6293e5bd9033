//! Execution State Store.
//!
//! Concurrent map from task id to its live `ExecutionState`. Updates clone
//! the current state, mutate the clone and swap it in under the write lock,
//! so readers only ever see whole snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use super::status::StateCounts;
use crate::domain::{ExecutionState, RunId, StepId, StoreError, TaskId};

#[derive(Default)]
pub struct ExecutionStateStore {
    states: RwLock<HashMap<TaskId, Arc<ExecutionState>>>,
    changed: Notify,
}

impl ExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh PENDING state for `task_id`.
    pub async fn create(
        &self,
        task_id: TaskId,
        plan: Vec<StepId>,
    ) -> Result<ExecutionState, StoreError> {
        let mut states = self.states.write().await;
        if states.contains_key(&task_id) {
            return Err(StoreError::AlreadyExists(task_id));
        }
        let state = ExecutionState::new(task_id.clone(), RunId::generate(), plan);
        states.insert(task_id, Arc::new(state.clone()));
        drop(states);
        self.changed.notify_waiters();
        Ok(state)
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        self.snapshot(task_id)
            .await
            .map(|s| (*s).clone())
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    /// Shared snapshot without cloning the state.
    pub async fn snapshot(&self, task_id: &TaskId) -> Option<Arc<ExecutionState>> {
        self.states.read().await.get(task_id).cloned()
    }

    pub async fn contains(&self, task_id: &TaskId) -> bool {
        self.states.read().await.contains_key(task_id)
    }

    /// Apply `mutate` to a copy of the state and publish it atomically.
    pub async fn update<F>(&self, task_id: &TaskId, mutate: F) -> Result<ExecutionState, StoreError>
    where
        F: FnOnce(&mut ExecutionState),
    {
        let mut states = self.states.write().await;
        let current = states
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        let mut next = (**current).clone();
        mutate(&mut next);
        *current = Arc::new(next.clone());
        drop(states);
        self.changed.notify_waiters();
        Ok(next)
    }

    /// Remove a terminal state.
    pub async fn delete(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        let mut states = self.states.write().await;
        let terminal = match states.get(task_id) {
            None => return Err(StoreError::NotFound(task_id.clone())),
            Some(state) => state.is_terminal(),
        };
        if !terminal {
            return Err(StoreError::NotTerminal(task_id.clone()));
        }
        states
            .remove(task_id)
            .map(|s| (*s).clone())
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    /// All states, ordered by task id.
    pub async fn list(&self) -> Vec<ExecutionState> {
        let states = self.states.read().await;
        let mut all: Vec<ExecutionState> = states.values().map(|s| (**s).clone()).collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    pub async fn counts_by_state(&self) -> StateCounts {
        let states = self.states.read().await;
        let mut counts = StateCounts::default();
        for state in states.values() {
            counts.add(state.lifecycle_state);
        }
        counts
    }

    /// Drop every terminal state. Returns how many were removed.
    pub async fn purge_terminal(&self) -> usize {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, s| !s.is_terminal());
        before - states.len()
    }

    /// Wait until `task_id` is terminal and return its final state.
    pub async fn wait_terminal(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.get(task_id).await?;
            if state.is_terminal() {
                return Ok(state);
            }
            notified.await;
        }
    }
}
