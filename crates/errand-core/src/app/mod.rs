//! Application layer: parser, plan, state store, per-task runner and the
//! engine that ties them together.

pub mod builder;
pub mod engine;
pub mod parser;
pub mod plan;
mod runner;
pub mod status;
pub mod store;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::Engine;
pub use self::parser::{ParserOptions, TemplateParser};
pub use self::plan::{FallbackSelection, Plan, SpliceOptions};
pub use self::status::StateCounts;
pub use self::store::ExecutionStateStore;
