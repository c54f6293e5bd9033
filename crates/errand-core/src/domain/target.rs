//! Observations of the environment: positions, destinations, threats and
//! target snapshots.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Where a `travel_to` step (or an escort waypoint) is heading.
///
/// Templates may name a place (`"alt_door"`) or give coordinates
/// (`{"x": 1, "y": 2}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Named(String),
    Point(Position),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Named(name) => f.write_str(name),
            Destination::Point(p) => write!(f, "({}, {}, {})", p.x, p.y, p.z),
        }
    }
}

/// A hostile influence on a target, reported by `snapshot_target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub id: String,
    #[serde(default)]
    pub severity: f64,
}

impl Threat {
    pub fn new(id: impl Into<String>, severity: f64) -> Self {
        Self {
            id: id.into(),
            severity,
        }
    }
}

/// Point-in-time view of one target in the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target_id: String,

    /// Normalized "wellbeing" of the target (health, integrity, ...), usually
    /// in `0.0..=1.0`.
    pub state_value: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threats: Vec<Threat>,
}

impl TargetSnapshot {
    pub fn new(target_id: impl Into<String>, state_value: f64) -> Self {
        Self {
            target_id: target_id.into(),
            state_value,
            position: None,
            flags: BTreeSet::new(),
            threats: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_threat(mut self, threat: Threat) -> Self {
        self.threats.push(threat);
        self
    }
}
