//! Process-wide logging and error-reporting setup, done once at startup
//! before anything else runs.

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`
/// (defaulting to `info`), an `ErrorLayer` so `color-eyre` reports can
/// capture span traces, and `color-eyre`'s panic/error hooks.
pub fn install() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .init();

    Ok(())
}
