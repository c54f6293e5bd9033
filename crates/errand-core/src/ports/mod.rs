//! Ports: the interfaces the engine needs from the outside world.

pub mod environment;

pub use self::environment::{EnvError, EnvironmentContext, Movement, ResourceUse};
