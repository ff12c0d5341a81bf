//! Diagnostic tracing for the engine.
//!
//! Tracing output is for debugging only. The product record of a run is the session
//! file written by `io::session`, which does not depend on `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_directive` (the config's `log_level`).
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=riva=debug riva run --goal "create notes.md" --acceptance "notes.md exists"
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
