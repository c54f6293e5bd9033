//! Steps: the typed, immutable nodes a template is parsed into.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::ids::{StepId, StepType, TaskId};
use super::retry::RetryPolicy;

/// Ordered parameter map (`serde_json` is built with `preserve_order`).
pub type Parameters = Map<String, Value>;

/// One alternative step sequence tried when the owning step gives up.
pub type Branch = Vec<Step>;

/// One node in a task's plan.
///
/// Created once at parse time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: StepId,
    pub step_type: StepType,
    pub parameters: Parameters,

    /// `None` means "use the handler/registry default".
    pub timeout: Option<Duration>,

    /// `None` means "use the registry default".
    pub retry_policy: Option<RetryPolicy>,

    /// Alternatives, tried first-untried-first.
    pub fallback: Vec<Branch>,
}

impl Step {
    pub fn new(id: impl Into<StepId>, step_type: impl Into<StepType>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            parameters: Parameters::new(),
            timeout: None,
            retry_policy: None,
            fallback: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_fallback(mut self, branch: Branch) -> Self {
        self.fallback.push(branch);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(Value::as_f64)
    }

    /// Decode a parameter into a typed value. `Ok(None)` when absent.
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, String> {
        match self.param(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| format!("parameter '{key}': {e}")),
        }
    }

    pub fn has_fallback(&self) -> bool {
        !self.fallback.is_empty()
    }

    /// Deepest fallback nesting below this step (0 when it has none).
    pub fn fallback_nesting(&self) -> usize {
        self.fallback
            .iter()
            .flatten()
            .map(|s| 1 + s.fallback_nesting())
            .max()
            .unwrap_or(0)
    }
}

/// The ordered, parsed plan of a task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepList(Vec<Step>);

impl StepList {
    pub fn new(steps: Vec<Step>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.0.iter()
    }

    /// Every step id, fallback steps included, depth-first.
    pub fn all_ids(&self) -> Vec<&StepId> {
        fn walk<'a>(steps: &'a [Step], out: &mut Vec<&'a StepId>) {
            for step in steps {
                out.push(&step.id);
                for branch in &step.fallback {
                    walk(branch, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.0, &mut out);
        out
    }

    /// First id, fallback steps included, that occurs more than once.
    pub fn duplicate_id(&self) -> Option<&StepId> {
        let mut seen = HashSet::new();
        self.all_ids().into_iter().find(|id| !seen.insert(*id))
    }
}

impl From<Vec<Step>> for StepList {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A parsed template: the task id it declares plus its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTemplate {
    pub task_id: TaskId,
    pub steps: StepList,
}
