//! Logging and observability
//!
//! Structured logging setup for the engine and the CLI.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "DOCKERTREE_LOG";

/// Initialize the logging system.
///
/// The filter is taken from `DOCKERTREE_LOG` (falling back to `RUST_LOG`,
/// then to `info`). Safe to call once per process.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}
