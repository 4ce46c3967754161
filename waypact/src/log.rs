//! Tracing subscriber bootstrap.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedding application's job. These helpers cover the common case
//! for binaries and integration tests.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back
/// to the given directives.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_with_filter(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Installs the default subscriber at `info` level.
pub fn init() {
    init_with_filter("info");
}
