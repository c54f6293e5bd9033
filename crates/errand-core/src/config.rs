//! Engine configuration.
//!
//! Loaded from TOML. Every section and every key is optional; missing values
//! take the defaults below.
//!
//! ```toml
//! [engine]
//! default_timeout_seconds = 60.0
//! poll_interval_seconds = 2.0
//! max_fallback_depth = 3
//! unknown_step_types = "reject"   # or "skip"
//! fallback_escalation = true
//! splice_mode = "replace_remainder"   # or "replace_step"
//! default_actor = "player"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_seconds = 1.0
//! backoff_multiplier = 2.0
//! max_delay_seconds = 30.0
//!
//! [handlers]
//! arrival_tolerance = 1.5
//! protection_threshold = 0.5
//! escort_grace_seconds = 10.0
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub retry: RetrySection,
    pub handlers: HandlerSection,
    pub logging: LoggingSection,
}

/// What the parser does with a step type no handler is registered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStepPolicy {
    /// Fail the parse with `UnknownStepType`.
    #[default]
    Reject,

    /// Drop the step and log a warning.
    #[serde(alias = "skip")]
    SkipAndLog,
}

/// How a fallback branch is spliced into the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceMode {
    /// The branch replaces the failing step and every primary step after it.
    #[default]
    ReplaceRemainder,

    /// The branch replaces only the failing step; later primary steps still run.
    ReplaceStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub default_timeout_seconds: f64,
    pub poll_interval_seconds: f64,
    pub max_fallback_depth: usize,
    pub unknown_step_types: UnknownStepPolicy,
    pub fallback_escalation: bool,
    pub splice_mode: SpliceMode,
    pub default_actor: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 60.0,
            poll_interval_seconds: 2.0,
            max_fallback_depth: 3,
            unknown_step_types: UnknownStepPolicy::Reject,
            fallback_escalation: true,
            splice_mode: SpliceMode::ReplaceRemainder,
            default_actor: "player".to_string(),
        }
    }
}

impl EngineSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub max_delay_seconds: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_seconds: policy.base_delay.as_secs_f64(),
            backoff_multiplier: policy.backoff_multiplier,
            max_delay_seconds: policy.max_delay.as_secs_f64(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs_f64(self.base_delay_seconds),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_secs_f64(self.max_delay_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSection {
    pub arrival_tolerance: f64,
    pub protection_threshold: f64,
    pub escort_grace_seconds: f64,
}

impl Default for HandlerSection {
    fn default() -> Self {
        Self {
            arrival_tolerance: 1.5,
            protection_threshold: 0.5,
            escort_grace_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// error, warn, info, debug, trace
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("engine.default_timeout_seconds", self.engine.default_timeout_seconds)?;
        positive("engine.poll_interval_seconds", self.engine.poll_interval_seconds)?;
        if self.engine.default_actor.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "engine.default_actor",
                message: "must not be empty".to_string(),
            });
        }

        non_negative("retry.base_delay_seconds", self.retry.base_delay_seconds)?;
        non_negative("retry.max_delay_seconds", self.retry.max_delay_seconds)?;
        self.retry
            .policy()
            .validate()
            .map_err(|message| ConfigError::Invalid {
                key: "retry",
                message,
            })?;

        positive("handlers.arrival_tolerance", self.handlers.arrival_tolerance)?;
        non_negative("handlers.protection_threshold", self.handlers.protection_threshold)?;
        non_negative("handlers.escort_grace_seconds", self.handlers.escort_grace_seconds)?;
        Ok(())
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("expected a positive number, got {value}"),
        })
    }
}

fn non_negative(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("expected a non-negative number, got {value}"),
        })
    }
}
