//! Tracing subscriber set-up.
//!
//! Priority: `RUST_LOG` > the `level` argument. Output goes to stderr so a
//! binary can keep stdout for its own results.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. A second call is a no-op.
pub fn init_telemetry(level: &str) {
    let default_filter = format!("{level},errand_core={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .pretty();

    #[cfg(not(debug_assertions))]
    let layer = fmt::layer().with_writer(std::io::stderr).compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .ok();
}
