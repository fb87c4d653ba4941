//! Tracing subscriber setup.
//!
//! Console logging with `EnvFilter`. `RUST_LOG` controls verbosity
//! (default: `info`).

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Safe to call once per process; later calls are ignored so tests can
/// install their own subscribers.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
