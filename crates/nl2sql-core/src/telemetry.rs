//! Tracing setup for binaries and tests embedding the pipeline.
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
