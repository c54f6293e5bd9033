use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use errand_core::impls::{InMemoryEnvironment, WorldSpec};
use errand_core::telemetry::init_telemetry;
use errand_core::{EngineBuilder, EngineConfig};
use serde_json::Value;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    init_telemetry(level);

    match cli.command {
        Command::Validate { template } => {
            let raw = read(&template)?;
            let engine = EngineBuilder::new(config)
                .environment(Arc::new(InMemoryEnvironment::new()))
                .build()?;
            let parsed = engine.parse_template(&raw)?;
            println!(
                "{}: task '{}' with {} step(s) is valid",
                template.display(),
                parsed.task_id,
                parsed.steps.len()
            );
            Ok(())
        }

        Command::Run {
            template,
            world,
            initial_context,
        } => {
            let raw = read(&template)?;
            let world: WorldSpec = match &world {
                Some(path) => serde_json::from_str(&read(path)?)
                    .with_context(|| format!("invalid world file {}", path.display()))?,
                None => WorldSpec::default(),
            };
            let initial_context: Value = match initial_context {
                Some(json) => serde_json::from_str(&json).context("invalid --initial-context")?,
                None => Value::Null,
            };

            let engine = EngineBuilder::new(config)
                .environment(Arc::new(InMemoryEnvironment::from_spec(world)))
                .build()?;
            let task_id = engine.start_template(&raw, initial_context).await?;
            tracing::info!(task_id = %task_id, "running");

            let state = engine.wait_for(&task_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}
