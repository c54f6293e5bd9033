//! Domain model (ids, steps, conditions, outcomes, state, decisions, errors).

pub mod condition;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod state;
pub mod step;
pub mod target;

pub use condition::{Condition, ConditionError, TriggerType};
pub use decision::{Decision, DecisionInput, decide};
pub use errors::{RegistryError, StoreError, TemplateError};
pub use ids::{RunId, StepId, StepType, TaskId};
pub use outcome::{FailureReason, StepFailure, StepResult};
pub use retry::RetryPolicy;
pub use state::{ExecutionState, FailureRecord, LifecycleState, LogEntry, LogEvent};
pub use step::{Branch, Parameters, Step, StepList, TaskTemplate};
pub use target::{Destination, Position, TargetSnapshot, Threat};
