//! Logging infrastructure for the Ideawell engine
//!
//! Structured tracing output; embedding services call [`init`] once at
//! startup.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `level` is the fallback when `RUST_LOG` is not set. Safe to call once per
/// process; later calls are ignored.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
