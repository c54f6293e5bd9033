//! Engine: the public face of the orchestrator.
//!
//! Parses templates, starts one worker per task, answers state queries and
//! routes cancellation. Built with `EngineBuilder` or `Engine::new`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use super::parser::{ParserOptions, TemplateParser};
use super::plan::{Plan, SpliceOptions};
use super::runner::TaskRunner;
use super::store::ExecutionStateStore;
use crate::config::EngineConfig;
use crate::domain::{
    ExecutionState, RunId, Step, StepList, StoreError, TaskId, TaskTemplate, TemplateError,
};
use crate::handlers::{HandlerRegistry, SharedEnvironment};
use crate::ports::EnvironmentContext;

type CancelMap = HashMap<TaskId, (RunId, watch::Sender<bool>)>;

pub struct Engine {
    config: EngineConfig,
    registry: Arc<HandlerRegistry>,
    env: SharedEnvironment,
    store: Arc<ExecutionStateStore>,
    cancels: Arc<Mutex<CancelMap>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: HandlerRegistry,
        environment: Arc<dyn EnvironmentContext>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            env: SharedEnvironment::new(environment),
            store: Arc::new(ExecutionStateStore::new()),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The environment as handlers see it, with its actor locks.
    pub fn environment(&self) -> &SharedEnvironment {
        &self.env
    }

    pub fn store(&self) -> &Arc<ExecutionStateStore> {
        &self.store
    }

    pub fn parse_template(&self, raw: &str) -> Result<TaskTemplate, TemplateError> {
        TemplateParser::new(&self.registry, ParserOptions::from_config(&self.config)).parse(raw)
    }

    /// Start running `steps` as task `task_id`.
    ///
    /// Returns `Ok(false)` without doing anything when the id is already in
    /// the store. Every step type, fallback branches included, must have a
    /// registered handler, and step ids must be unique across the whole plan.
    pub async fn start_task(
        &self,
        task_id: TaskId,
        steps: StepList,
        initial_context: Value,
    ) -> Result<bool, TemplateError> {
        if steps.is_empty() {
            return Err(TemplateError::EmptyTemplate);
        }
        if let Some(id) = steps.duplicate_id() {
            return Err(TemplateError::DuplicateStepId(id.clone()));
        }
        if let Some(step) = find_unregistered(steps.steps(), &self.registry) {
            return Err(TemplateError::UnknownStepType {
                step_id: step.id.clone(),
                step_type: step.step_type.clone(),
            });
        }

        let plan = Plan::new(steps.into_steps());
        let state = match self.store.create(task_id.clone(), plan.ids()).await {
            Ok(state) => state,
            Err(StoreError::AlreadyExists(_)) => {
                warn!(task_id = %task_id, "task already started, ignoring");
                return Ok(false);
            }
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "could not create task state");
                return Ok(false);
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .await
            .insert(task_id.clone(), (state.run_id, cancel_tx));

        let runner = TaskRunner {
            task_id: task_id.clone(),
            run_id: state.run_id,
            plan,
            registry: Arc::clone(&self.registry),
            env: self.env.clone(),
            store: Arc::clone(&self.store),
            initial_context,
            cancel: cancel_rx,
            splice: SpliceOptions {
                mode: self.config.engine.splice_mode,
                escalation: self.config.engine.fallback_escalation,
                max_depth: self.config.engine.max_fallback_depth,
            },
        };
        let cancels = Arc::clone(&self.cancels);
        let run_id = state.run_id;
        tokio::spawn(async move {
            runner.run().await;
            let mut cancels = cancels.lock().await;
            if cancels.get(&task_id).is_some_and(|(id, _)| *id == run_id) {
                cancels.remove(&task_id);
            }
        });

        info!(task_id = %state.task_id, run_id = %state.run_id, "task scheduled");
        Ok(true)
    }

    /// Parse `raw` and start it under the task id it declares.
    pub async fn start_template(
        &self,
        raw: &str,
        initial_context: Value,
    ) -> Result<TaskId, TemplateError> {
        let template = self.parse_template(raw)?;
        self.start_task(template.task_id.clone(), template.steps, initial_context)
            .await?;
        Ok(template.task_id)
    }

    pub async fn get_state(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        self.store.get(task_id).await
    }

    /// Request cancellation. Returns `false` when the task is unknown or
    /// already terminal.
    pub async fn cancel_task(&self, task_id: &TaskId) -> bool {
        let cancels = self.cancels.lock().await;
        let Some((_, cancel)) = cancels.get(task_id) else {
            return false;
        };
        match self.store.snapshot(task_id).await {
            Some(state) if !state.is_terminal() => {
                cancel.send_replace(true);
                info!(task_id = %task_id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Wait for `task_id` to reach COMPLETED or FAILED.
    pub async fn wait_for(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        self.store.wait_terminal(task_id).await
    }

    /// Drop the state of a finished task. Its id may be started again.
    pub async fn purge_task(&self, task_id: &TaskId) -> Result<ExecutionState, StoreError> {
        self.store.delete(task_id).await
    }
}

/// First step, searching fallback branches too, whose type has no handler.
fn find_unregistered<'a>(steps: &'a [Step], registry: &HandlerRegistry) -> Option<&'a Step> {
    steps.iter().find_map(|step| {
        if !registry.contains(&step.step_type) {
            return Some(step);
        }
        step.fallback
            .iter()
            .find_map(|branch| find_unregistered(branch, registry))
    })
}
