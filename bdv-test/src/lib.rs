//! Shared test helpers for the BDV workspace: tracing setup for tests,
//! the color-eyre-backed `Result` alias tests use for `?`, and a thin
//! wrapper around spawning the `bdvd` binary for integration tests.

pub mod command;
pub mod prelude;
pub mod vectors;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a tracing subscriber and color-eyre panic/error hooks, once per
/// process. Call at the top of any test that wants readable `tracing` output
/// or eyre-formatted backtraces on failure.
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();

        let _ = color_eyre::install();
    });
}
