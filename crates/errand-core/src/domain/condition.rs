//! Conditions: stateless trigger predicates over the environment.
//!
//! Most trigger types are decided locally from a `TargetSnapshot`; the rest
//! (`at_location`, `resource_available`, unknown tags) are delegated to the
//! environment's own `check_condition`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::target::{Position, TargetSnapshot};

/// Kind of trigger a condition checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriggerType {
    /// `state_value >= threshold`
    StateAtLeast,
    /// `state_value < threshold`
    StateBelow,
    /// `flag` is present on the target.
    FlagSet,
    /// `flag` is absent from the target.
    FlagCleared,
    /// Target position within `radius` of (`x`, `y`, `z`).
    WithinRadius,
    /// No threats reported around the target.
    ThreatsCleared,
    /// Target (an actor) stands at the named `location`. Delegated.
    AtLocation,
    /// Resource named by `target` can be used. Delegated.
    ResourceAvailable,
    /// Any other tag; delegated to the environment verbatim.
    External(String),
}

impl TriggerType {
    pub fn as_str(&self) -> &str {
        match self {
            TriggerType::StateAtLeast => "state_at_least",
            TriggerType::StateBelow => "state_below",
            TriggerType::FlagSet => "flag_set",
            TriggerType::FlagCleared => "flag_cleared",
            TriggerType::WithinRadius => "within_radius",
            TriggerType::ThreatsCleared => "threats_cleared",
            TriggerType::AtLocation => "at_location",
            TriggerType::ResourceAvailable => "resource_available",
            TriggerType::External(tag) => tag,
        }
    }

    /// Whether the trigger can be decided from a target snapshot alone.
    pub fn is_snapshot_based(&self) -> bool {
        matches!(
            self,
            TriggerType::StateAtLeast
                | TriggerType::StateBelow
                | TriggerType::FlagSet
                | TriggerType::FlagCleared
                | TriggerType::WithinRadius
                | TriggerType::ThreatsCleared
        )
    }

    fn required_predicates(&self) -> &'static [&'static str] {
        match self {
            TriggerType::StateAtLeast | TriggerType::StateBelow => &["threshold"],
            TriggerType::FlagSet | TriggerType::FlagCleared => &["flag"],
            TriggerType::WithinRadius => &["x", "y", "radius"],
            TriggerType::AtLocation => &["location"],
            _ => &[],
        }
    }
}

impl From<String> for TriggerType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "state_at_least" => TriggerType::StateAtLeast,
            "state_below" => TriggerType::StateBelow,
            "flag_set" => TriggerType::FlagSet,
            "flag_cleared" => TriggerType::FlagCleared,
            "within_radius" => TriggerType::WithinRadius,
            "threats_cleared" => TriggerType::ThreatsCleared,
            "at_location" => TriggerType::AtLocation,
            "resource_available" => TriggerType::ResourceAvailable,
            _ => TriggerType::External(value),
        }
    }
}

impl From<TriggerType> for String {
    fn from(value: TriggerType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("condition {trigger} on '{target}' is missing predicate parameter '{key}'")]
    MissingPredicate {
        trigger: String,
        target: String,
        key: String,
    },

    #[error("condition {0} has an empty target")]
    EmptyTarget(String),

    #[error("condition {0} cannot be evaluated from a snapshot")]
    NotSnapshotBased(String),
}

/// A trigger predicate. Evaluated, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub trigger_type: TriggerType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub predicate_parameters: Map<String, Value>,
}

impl Condition {
    pub fn new(trigger_type: TriggerType, target: impl Into<String>) -> Self {
        Self {
            trigger_type,
            target: target.into(),
            predicate_parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate_parameters.insert(key.into(), value.into());
        self
    }

    /// `resource_available` check for `resource_id`.
    pub fn resource_available(resource_id: impl Into<String>) -> Self {
        Self::new(TriggerType::ResourceAvailable, resource_id)
    }

    /// `at_location` check for `actor` standing at `location`.
    pub fn at_location(actor: impl Into<String>, location: impl Into<String>) -> Self {
        let location: String = location.into();
        Self::new(TriggerType::AtLocation, actor).with_param("location", location)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.predicate_parameters.get(key).and_then(Value::as_f64)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.predicate_parameters.get(key).and_then(Value::as_str)
    }

    /// Structural check: target present and the predicate parameters the
    /// trigger needs are there.
    pub fn validate(&self) -> Result<(), ConditionError> {
        if self.target.trim().is_empty() {
            return Err(ConditionError::EmptyTarget(self.trigger_type.to_string()));
        }
        for key in self.trigger_type.required_predicates() {
            if !self.predicate_parameters.contains_key(*key) {
                return Err(self.missing(key));
            }
        }
        Ok(())
    }

    /// Decide a snapshot-based condition.
    pub fn evaluate_snapshot(&self, snapshot: &TargetSnapshot) -> Result<bool, ConditionError> {
        match &self.trigger_type {
            TriggerType::StateAtLeast => Ok(snapshot.state_value >= self.require_number("threshold")?),
            TriggerType::StateBelow => Ok(snapshot.state_value < self.require_number("threshold")?),
            TriggerType::FlagSet => Ok(snapshot.flags.contains(self.require_string("flag")?)),
            TriggerType::FlagCleared => Ok(!snapshot.flags.contains(self.require_string("flag")?)),
            TriggerType::WithinRadius => {
                let center = Position::new(
                    self.require_number("x")?,
                    self.require_number("y")?,
                    self.number("z").unwrap_or(0.0),
                );
                let radius = self.require_number("radius")?;
                Ok(snapshot
                    .position
                    .is_some_and(|p| p.distance_to(&center) <= radius))
            }
            TriggerType::ThreatsCleared => Ok(snapshot.threats.is_empty()),
            other => Err(ConditionError::NotSnapshotBased(other.to_string())),
        }
    }

    fn require_number(&self, key: &str) -> Result<f64, ConditionError> {
        self.number(key).ok_or_else(|| self.missing(key))
    }

    fn require_string(&self, key: &str) -> Result<&str, ConditionError> {
        self.string(key).ok_or_else(|| self.missing(key))
    }

    fn missing(&self, key: &str) -> ConditionError {
        ConditionError::MissingPredicate {
            trigger: self.trigger_type.to_string(),
            target: self.target.clone(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.trigger_type, self.target)
    }
}
