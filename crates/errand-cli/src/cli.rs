//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Errand task orchestrator
///
/// Validates task templates and runs them against a simulated world.
#[derive(Parser, Debug)]
#[command(name = "errand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and validate a template without running it
    Validate {
        /// Template file (JSON)
        template: PathBuf,
    },

    /// Run a template to completion and print its final state as JSON
    Run {
        /// Template file (JSON)
        template: PathBuf,

        /// World description for the in-memory environment (JSON)
        #[arg(long, value_name = "PATH")]
        world: Option<PathBuf>,

        /// Context handed to every step, as a JSON literal
        #[arg(long, value_name = "JSON")]
        initial_context: Option<String>,
    },
}
