//! Tracing setup for binaries and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
