//! `tracing` subscriber bootstrap.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static LOG_INIT_ONCE: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once and from tests; if the host already installed
/// a global subscriber, that one is kept.
pub fn init() {
    LOG_INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_err()
        {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
