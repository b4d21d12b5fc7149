//! Developer diagnostics via `tracing`.
//!
//! The event log is the product record of a run; tracing output is for
//! whoever operates the process and never replaces it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` when it is unset or
/// invalid. Output goes to stderr in compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pentest_runner=debug pentest serve
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
