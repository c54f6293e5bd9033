//! Per-task worker.
//!
//! One `TaskRunner` drives one task through its plan: it ticks the current
//! step's handler, sleeps between `Pending` ticks, enforces the step timeout,
//! applies retry / fallback decisions and publishes every transition to the
//! store. Steps of one task run strictly one after another.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::plan::{Plan, SpliceOptions};
use super::store::ExecutionStateStore;
use crate::domain::{
    Decision, DecisionInput, ExecutionState, FailureReason, LifecycleState, LogEvent, RunId, Step,
    StepFailure, StepResult, TaskId, decide,
};
use crate::handlers::{HandlerRegistry, SharedEnvironment, StepContext, StepHandler};

/// Floor for the delay between two ticks of a pending attempt.
const MIN_TICK: Duration = Duration::from_millis(10);

const CANCELLED_DETAIL: &str = "cancelled by caller";

/// How one attempt of a step ended.
#[derive(Debug)]
enum Attempt {
    Succeeded(String),
    Failed(StepFailure),
    Cancelled,
}

pub(crate) struct TaskRunner {
    pub(crate) task_id: TaskId,
    pub(crate) run_id: RunId,
    pub(crate) plan: Plan,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) env: SharedEnvironment,
    pub(crate) store: Arc<ExecutionStateStore>,
    pub(crate) initial_context: Value,
    pub(crate) cancel: watch::Receiver<bool>,
    pub(crate) splice: SpliceOptions,
}

impl TaskRunner {
    #[instrument(name = "task", skip_all, fields(task_id = %self.task_id, run_id = %self.run_id))]
    pub(crate) async fn run(mut self) {
        let steps = self.plan.len();
        self.update(|s| {
            s.transition(LifecycleState::Active);
            s.record(
                LogEvent::TaskStarted,
                None,
                None,
                format!("{steps} step(s) planned"),
            );
        })
        .await;
        info!(steps, "task started");

        let mut index = 0;
        let mut attempt = 1;
        loop {
            let Some(step) = self.plan.get(index).map(|e| Arc::clone(&e.step)) else {
                break;
            };
            if self.is_cancelled() {
                self.finish_cancelled(&step).await;
                return;
            }

            let Some(handler) = self.registry.get(&step.step_type).cloned() else {
                warn!(step_id = %step.id, step_type = %step.step_type, "no handler registered");
                self.update(|s| {
                    s.mark_failed(
                        Some(&step.id),
                        FailureReason::UnknownStepType,
                        format!("no handler registered for '{}'", step.step_type),
                    )
                })
                .await;
                return;
            };

            if attempt == 1 {
                debug!(step_id = %step.id, step_type = %step.step_type, "step started");
                self.update(|s| {
                    s.record(
                        LogEvent::StepStarted,
                        Some(&step.id),
                        None,
                        step.step_type.to_string(),
                    )
                })
                .await;
            }

            let failure = match self.run_attempt(&step, handler.as_ref(), attempt).await {
                Attempt::Succeeded(detail) => {
                    info!(step_id = %step.id, attempt, "step succeeded");
                    self.update(|s| {
                        s.completed_steps.insert(step.id.clone());
                        s.current_step_index = index + 1;
                        s.retry_count = 0;
                        s.transition(LifecycleState::Active);
                        s.record(LogEvent::StepSucceeded, Some(&step.id), None, detail);
                    })
                    .await;
                    index += 1;
                    attempt = 1;
                    continue;
                }
                Attempt::Cancelled => {
                    self.finish_cancelled(&step).await;
                    return;
                }
                Attempt::Failed(failure) => failure,
            };

            warn!(
                step_id = %step.id,
                attempt,
                reason = %failure.reason,
                detail = %failure.detail,
                "step attempt failed"
            );
            self.update(|s| {
                s.record(
                    LogEvent::StepFailed,
                    Some(&step.id),
                    Some(failure.reason),
                    failure.detail.clone(),
                )
            })
            .await;

            let policy = self.registry.retry_policy_for(&step);
            let decision = decide(&DecisionInput {
                handler: handler.as_ref(),
                step: &step,
                policy: &policy,
                attempt,
                failure: &failure,
            });
            let own_branch = matches!(decision, Decision::Fallback { .. });

            match decision {
                Decision::Retry { delay, reason } => {
                    info!(step_id = %step.id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
                    self.update(|s| {
                        s.transition(LifecycleState::Retrying);
                        s.retry_count += 1;
                        s.record(
                            LogEvent::RetryScheduled,
                            Some(&step.id),
                            Some(failure.reason),
                            reason,
                        );
                    })
                    .await;
                    if !self.pause(delay).await {
                        self.finish_cancelled(&step).await;
                        return;
                    }
                    self.update(|s| s.transition(LifecycleState::Active)).await;
                    attempt += 1;
                }
                Decision::Fallback { reason } | Decision::Fail { reason } => {
                    let Some(selection) = self.plan.splice_fallback(index, own_branch, self.splice)
                    else {
                        warn!(step_id = %step.id, reason = %failure.reason, "task failed");
                        self.update(|s| {
                            s.mark_failed(
                                Some(&step.id),
                                failure.reason,
                                format!("{reason}: {}", failure.detail),
                            )
                        })
                        .await;
                        return;
                    };

                    info!(
                        step_id = %step.id,
                        owner = %selection.owner,
                        branch = selection.branch,
                        escalated = selection.escalated,
                        "fallback selected"
                    );
                    let plan = self.plan.ids();
                    let branch: Vec<&str> = selection.steps.iter().map(|id| id.as_str()).collect();
                    self.update(|s| {
                        s.transition(LifecycleState::Fallback);
                        s.fallback_depth += 1;
                        s.retry_count = 0;
                        s.plan = plan;
                        s.record(
                            LogEvent::FallbackSelected,
                            Some(&step.id),
                            Some(failure.reason),
                            format!(
                                "{reason}; branch {} of '{}': [{}]",
                                selection.branch + 1,
                                selection.owner,
                                branch.join(", ")
                            ),
                        );
                    })
                    .await;
                    self.update(|s| s.transition(LifecycleState::Active)).await;
                    attempt = 1;
                }
            }
        }

        info!("task completed");
        self.update(|s| s.mark_completed()).await;
    }

    /// Tick one attempt until it succeeds, fails, times out or is cancelled.
    async fn run_attempt(&self, step: &Step, handler: &dyn StepHandler, attempt: u32) -> Attempt {
        let timeout = self.registry.timeout_for(step, handler);
        let mut ctx = StepContext::new(
            self.task_id.clone(),
            step.id.clone(),
            attempt,
            timeout,
            self.initial_context.clone(),
            self.cancel.clone(),
        );
        let mut cancel = self.cancel.clone();

        loop {
            if self.is_cancelled() {
                return Attempt::Cancelled;
            }
            if ctx.timed_out() {
                return self.on_timeout(step, handler, timeout).await;
            }

            let remaining = ctx.remaining();
            let tick = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Attempt::Cancelled,
                tick = tokio::time::timeout(remaining, handler.execute(step, &self.env, &mut ctx)) => tick,
            };

            let result = match tick {
                Err(_) => return self.on_timeout(step, handler, timeout).await,
                Ok(Err(err)) => {
                    return Attempt::Failed(StepFailure::new(
                        FailureReason::EnvironmentUnavailable,
                        err.to_string(),
                    ));
                }
                Ok(Ok(result)) => result,
            };

            match result {
                StepResult::Success { detail } => return Attempt::Succeeded(detail),
                StepResult::Failure(failure) => return Attempt::Failed(failure),
                StepResult::Pending {
                    detail,
                    condition,
                    retry_after,
                } => {
                    debug!(step_id = %step.id, %detail, "step pending");
                    self.update(|s| {
                        if s.lifecycle_state != LifecycleState::Waiting
                            || s.active_condition != condition
                        {
                            s.transition(LifecycleState::Waiting);
                            s.record(LogEvent::Waiting, Some(&step.id), None, detail);
                        }
                        s.active_condition = condition;
                    })
                    .await;

                    let delay = retry_after.max(MIN_TICK).min(ctx.remaining());
                    if !self.pause(delay).await {
                        return Attempt::Cancelled;
                    }
                }
            }
        }
    }

    /// The step ran out of time: succeed only if its post-condition holds.
    async fn on_timeout(&self, step: &Step, handler: &dyn StepHandler, timeout: Duration) -> Attempt {
        match handler.check_success(step, &self.env).await {
            Ok(true) => Attempt::Succeeded(format!(
                "post-condition held when the {timeout:?} timeout expired"
            )),
            Ok(false) => Attempt::Failed(StepFailure::new(
                handler.timeout_reason(),
                format!("step {} timed out after {timeout:?}", step.id),
            )),
            Err(err) => Attempt::Failed(StepFailure::new(
                handler.timeout_reason(),
                format!(
                    "step {} timed out after {timeout:?}, post-condition check failed: {err}",
                    step.id
                ),
            )),
        }
    }

    async fn finish_cancelled(&self, step: &Step) {
        info!(step_id = %step.id, "task cancelled");
        self.update(|s| {
            s.record(
                LogEvent::Cancelled,
                Some(&step.id),
                Some(FailureReason::Cancelled),
                CANCELLED_DETAIL,
            );
            s.mark_failed(
                Some(&step.id),
                FailureReason::Cancelled,
                CANCELLED_DETAIL.to_string(),
            );
        })
        .await;
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
    async fn pause(&self, delay: Duration) -> bool {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ExecutionState),
    {
        if let Err(err) = self.store.update(&self.task_id, mutate).await {
            warn!(error = %err, "state update dropped");
        }
    }
}

/// Resolves once the cancel flag is raised. Never resolves if the sender is
/// gone without raising it.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
