//! Template Parser: raw JSON template -> validated `TaskTemplate`.
//!
//! Pure: no I/O, no clocks. Parsing the same input twice gives equal
//! templates.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::{EngineConfig, UnknownStepPolicy};
use crate::domain::{
    Branch, RetryPolicy, Step, StepId, StepList, StepType, TaskId, TaskTemplate, TemplateError,
};
use crate::handlers::HandlerRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct ParserOptions {
    pub unknown_step_types: UnknownStepPolicy,

    /// Deepest allowed fallback nesting (top-level steps are depth 0).
    pub max_fallback_depth: usize,

    /// Fills fields left out of an explicit `retry_policy`.
    pub retry_defaults: RetryPolicy,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            unknown_step_types: UnknownStepPolicy::Reject,
            max_fallback_depth: 3,
            retry_defaults: RetryPolicy::default(),
        }
    }
}

impl ParserOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            unknown_step_types: config.engine.unknown_step_types,
            max_fallback_depth: config.engine.max_fallback_depth,
            retry_defaults: config.retry.policy(),
        }
    }
}

#[derive(Deserialize)]
struct RawTemplate {
    task_id: String,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    id: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    timeout_seconds: Option<f64>,
    #[serde(default)]
    retry_policy: Option<RawRetryPolicy>,
    #[serde(default)]
    fallback: Vec<RawBranch>,
}

/// A fallback element: one step or a sequence of steps.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBranch {
    Sequence(Vec<RawStep>),
    Single(RawStep),
}

impl RawBranch {
    fn into_steps(self) -> Vec<RawStep> {
        match self {
            RawBranch::Sequence(steps) => steps,
            RawBranch::Single(step) => vec![step],
        }
    }
}

#[derive(Deserialize)]
struct RawRetryPolicy {
    max_attempts: Option<u32>,
    base_delay_seconds: Option<f64>,
    backoff_multiplier: Option<f64>,
    max_delay_seconds: Option<f64>,
}

pub struct TemplateParser<'a> {
    registry: &'a HandlerRegistry,
    options: ParserOptions,
}

impl<'a> TemplateParser<'a> {
    pub fn new(registry: &'a HandlerRegistry, options: ParserOptions) -> Self {
        Self { registry, options }
    }

    pub fn parse(&self, raw: &str) -> Result<TaskTemplate, TemplateError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| TemplateError::Malformed(e.to_string()))?;
        self.parse_value(value)
    }

    pub fn parse_value(&self, value: Value) -> Result<TaskTemplate, TemplateError> {
        let raw: RawTemplate =
            serde_json::from_value(value).map_err(|e| TemplateError::Malformed(e.to_string()))?;

        let task_id = TaskId::new(raw.task_id);
        if task_id.is_empty() {
            return Err(TemplateError::Malformed("task_id must not be empty".into()));
        }

        let mut seen = HashSet::new();
        let steps = self.convert_sequence(raw.steps, 0, &mut seen)?;
        if steps.is_empty() {
            return Err(TemplateError::EmptyTemplate);
        }

        Ok(TaskTemplate {
            task_id,
            steps: StepList::new(steps),
        })
    }

    fn convert_sequence(
        &self,
        raw: Vec<RawStep>,
        depth: usize,
        seen: &mut HashSet<StepId>,
    ) -> Result<Vec<Step>, TemplateError> {
        let mut steps = Vec::with_capacity(raw.len());
        for raw_step in raw {
            if let Some(step) = self.convert_step(raw_step, depth, seen)? {
                steps.push(step);
            }
        }
        Ok(steps)
    }

    /// `None` when the step was skipped as an unknown type.
    fn convert_step(
        &self,
        raw: RawStep,
        depth: usize,
        seen: &mut HashSet<StepId>,
    ) -> Result<Option<Step>, TemplateError> {
        let id = StepId::new(raw.id);
        if id.is_empty() {
            return Err(TemplateError::Malformed("step id must not be empty".into()));
        }
        if !seen.insert(id.clone()) {
            return Err(TemplateError::DuplicateStepId(id));
        }

        let step_type = StepType::new(raw.step_type);
        let Some(handler) = self.registry.get(&step_type) else {
            return match self.options.unknown_step_types {
                UnknownStepPolicy::Reject => Err(TemplateError::UnknownStepType {
                    step_id: id,
                    step_type,
                }),
                UnknownStepPolicy::SkipAndLog => {
                    tracing::warn!(step_id = %id, step_type = %step_type, "skipping step of unknown type");
                    Ok(None)
                }
            };
        };

        for parameter in handler.required_parameters() {
            if !raw.parameters.contains_key(*parameter) {
                return Err(TemplateError::MissingParameter {
                    step_id: id,
                    parameter: parameter.to_string(),
                });
            }
        }
        if let Err(message) = handler.validate_parameters(&raw.parameters) {
            return Err(TemplateError::InvalidParameter { step_id: id, message });
        }

        let timeout = match raw.timeout_seconds {
            None => None,
            Some(seconds) => Some(seconds_to_duration(seconds).map_err(|message| {
                TemplateError::InvalidTimeout {
                    step_id: id.clone(),
                    message,
                }
            })?),
        };

        let retry_policy = match raw.retry_policy {
            None => None,
            Some(policy) => Some(self.convert_retry(policy).map_err(|message| {
                TemplateError::InvalidRetryPolicy {
                    step_id: id.clone(),
                    message,
                }
            })?),
        };

        let mut fallback: Vec<Branch> = Vec::with_capacity(raw.fallback.len());
        if !raw.fallback.is_empty() && depth >= self.options.max_fallback_depth {
            return Err(TemplateError::FallbackDepthExceeded {
                step_id: id,
                limit: self.options.max_fallback_depth,
            });
        }
        for branch in raw.fallback {
            let branch = self.convert_sequence(branch.into_steps(), depth + 1, seen)?;
            if branch.is_empty() {
                tracing::warn!(step_id = %id, "dropping empty fallback branch");
                continue;
            }
            fallback.push(branch);
        }

        Ok(Some(Step {
            id,
            step_type,
            parameters: raw.parameters,
            timeout,
            retry_policy,
            fallback,
        }))
    }

    fn convert_retry(&self, raw: RawRetryPolicy) -> Result<RetryPolicy, String> {
        let defaults = &self.options.retry_defaults;
        let policy = RetryPolicy {
            max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: match raw.base_delay_seconds {
                Some(seconds) => seconds_to_duration(seconds)?,
                None => defaults.base_delay,
            },
            backoff_multiplier: raw.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
            max_delay: match raw.max_delay_seconds {
                Some(seconds) => seconds_to_duration(seconds)?,
                None => defaults.max_delay,
            },
        };
        policy.validate()?;
        Ok(policy)
    }
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, String> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("expected a non-negative number of seconds, got {seconds}"));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())
}
