//! errand-core
//!
//! Declarative task orchestration: parse a multi-step template into typed
//! steps, run each task's steps against an external environment, and recover
//! from partial failure with bounded retries and fallback branches.
//!
//! # Modules
//! - **domain**: steps, conditions, outcomes, retry policy, execution state, errors
//! - **ports**: the `EnvironmentContext` the engine drives
//! - **handlers**: the `StepHandler` contract, built-in step types, registry
//! - **app**: template parser, plan splicing, state store, engine
//! - **impls**: in-memory environment and per-actor locking
//! - **evaluator**: condition evaluation against the environment
//! - **config** / **telemetry**: TOML configuration and tracing set-up

pub mod app;
pub mod config;
pub mod domain;
pub mod evaluator;
pub mod handlers;
pub mod impls;
pub mod ports;
pub mod telemetry;

pub use app::{Engine, EngineBuilder};
pub use config::EngineConfig;
