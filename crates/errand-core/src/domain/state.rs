//! Execution state: the live, queryable record of one task run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::ids::{RunId, StepId, TaskId};
use super::outcome::FailureReason;

/// Lifecycle of a task.
///
/// Transitions:
/// - Pending -> Active
/// - Active -> Waiting -> Active (polling)
/// - Active -> Retrying -> Active (backoff)
/// - Active -> Fallback -> Active (branch spliced in)
/// - Active -> Completed | Failed
/// - any non-terminal -> Failed (cancellation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Pending,
    Active,
    Waiting,
    Retrying,
    Fallback,
    Completed,
    Failed,
}

impl LifecycleState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }
}

/// What happened, for the per-task log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    TaskStarted,
    StepStarted,
    StepSucceeded,
    StepFailed,
    Waiting,
    RetryScheduled,
    FallbackSelected,
    Cancelled,
    TaskCompleted,
    TaskFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: LogEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub detail: String,
}

/// Diagnostics for the most recent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub reason: FailureReason,
    pub detail: String,
}

/// Live status of one task run.
///
/// Written only by the engine's worker for this task; everybody else reads
/// cloned snapshots from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub current_step_index: usize,
    pub lifecycle_state: LifecycleState,
    pub retry_count: u32,

    /// Fallback transitions taken so far.
    pub fallback_depth: u32,

    pub completed_steps: BTreeSet<StepId>,
    pub failed_steps: BTreeSet<StepId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_condition: Option<Condition>,

    /// Step ids of the current plan, fallback splices applied.
    pub plan: Vec<StepId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureRecord>,

    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub log: Vec<LogEntry>,
}

impl ExecutionState {
    pub fn new(task_id: TaskId, run_id: RunId, plan: Vec<StepId>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            run_id,
            current_step_index: 0,
            lifecycle_state: LifecycleState::Pending,
            retry_count: 0,
            fallback_depth: 0,
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeSet::new(),
            active_condition: None,
            plan,
            last_failure: None,
            started_at: now,
            last_activity_at: now,
            log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle_state.is_terminal()
    }

    /// Id of the step at `current_step_index`, if any.
    pub fn current_step(&self) -> Option<&StepId> {
        self.plan.get(self.current_step_index)
    }

    pub fn record(
        &mut self,
        event: LogEvent,
        step_id: Option<&StepId>,
        reason: Option<FailureReason>,
        detail: impl Into<String>,
    ) {
        let now = Utc::now();
        self.log.push(LogEntry {
            timestamp: now,
            event,
            step_id: step_id.cloned(),
            reason,
            detail: detail.into(),
        });
        self.last_activity_at = now;
    }

    /// Move to a new non-terminal state.
    ///
    /// Leaving WAITING clears `active_condition`.
    pub fn transition(&mut self, next: LifecycleState) {
        debug_assert!(!self.is_terminal(), "terminal states are final");
        if next != LifecycleState::Waiting {
            self.active_condition = None;
        }
        self.lifecycle_state = next;
        self.last_activity_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.transition(LifecycleState::Completed);
        self.record(LogEvent::TaskCompleted, None, None, "all steps completed");
    }

    pub fn mark_failed(&mut self, step_id: Option<&StepId>, reason: FailureReason, detail: String) {
        if let Some(id) = step_id
            && reason != FailureReason::Cancelled
        {
            self.failed_steps.insert(id.clone());
        }
        self.last_failure = Some(FailureRecord {
            step_id: step_id.cloned(),
            reason,
            detail: detail.clone(),
        });
        self.transition(LifecycleState::Failed);
        self.record(LogEvent::TaskFailed, step_id, Some(reason), detail);
    }

    /// Log entries of one kind, in order.
    pub fn events(&self, event: LogEvent) -> impl Iterator<Item = &LogEntry> {
        self.log.iter().filter(move |e| e.event == event)
    }
}
