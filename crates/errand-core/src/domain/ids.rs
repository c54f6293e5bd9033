//! Domain identifiers (strongly-typed string keys).
//!
//! Task ids and step ids both come from templates as plain strings, so they
//! share one generic `Key<T>` implementation. The marker type only exists at
//! compile time; a `TaskId` can never be passed where a `StepId` is expected.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for the different key kinds.
pub trait KeyMarker: Send + Sync + 'static {
    /// Used in `Debug`-style diagnostics only.
    fn kind() -> &'static str;
}

/// Generic string key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key<T: KeyMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: KeyMarker> Key<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl<T: KeyMarker> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: KeyMarker> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", T::kind(), self.value)
    }
}

impl<T: KeyMarker> From<&str> for Key<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: KeyMarker> From<String> for Key<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: KeyMarker> Borrow<str> for Key<T> {
    fn borrow(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl KeyMarker for Task {
    fn kind() -> &'static str {
        "TaskId"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {}

impl KeyMarker for Step {
    fn kind() -> &'static str {
        "StepId"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {}

impl KeyMarker for Kind {
    fn kind() -> &'static str {
        "StepType"
    }
}

/// Identifier of a task (one running instance of a parsed step list).
pub type TaskId = Key<Task>;

/// Identifier of a step, unique within its task.
pub type StepId = Key<Step>;

/// Tag selecting a registered step handler.
pub type StepType = Key<Kind>;

/// Identifier of one run of a task.
///
/// A task id is chosen by the caller and may be reused after a purge; the run
/// id tells two runs apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn keys_display_their_raw_value() {
        let task = TaskId::new("escort-the-merchant");
        let step = StepId::new("s1");
        assert_eq!(task.to_string(), "escort-the-merchant");
        assert_eq!(step.as_str(), "s1");
        assert_eq!(format!("{step:?}"), "StepId(\"s1\")");
    }

    #[test]
    fn keys_serialize_as_plain_strings() {
        let step = StepId::new("open_gate");
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, "\"open_gate\"");
        let back: StepId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn keys_can_be_looked_up_by_str() {
        let mut map = HashMap::new();
        map.insert(StepType::new("travel_to"), 1);
        assert_eq!(map.get("travel_to"), Some(&1));
    }

    #[test]
    fn blank_keys_are_empty() {
        assert!(StepId::new("  ").is_empty());
        assert!(!StepId::new("a").is_empty());
    }

    #[test]
    fn run_ids_are_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("run-"));
    }
}
