//! Logging setup for the CLI.
//!
//! Logs go to stderr so stdout stays machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter from `DORMGUARD_LOG`, then `RUST_LOG`, then `info`.
pub fn init_logging() {
    let filter = std::env::var("DORMGUARD_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
