//! Tracing/logging setup shared by the CLI and by integration tests that
//! want readable output.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a process-wide `tracing` subscriber.
///
/// `json_format` selects structured JSON output (suited to log shipping)
/// over the pretty human-readable format (suited to local development).
/// `log_level` is used only when `RUST_LOG` is unset.
pub fn init_tracing(json_format: bool, log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .try_init()
            .context("failed to initialize tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
            .context("failed to initialize tracing subscriber")?;
    }

    Ok(())
}
