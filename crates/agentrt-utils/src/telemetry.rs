use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Initialize a process-wide `tracing` subscriber.
///
/// Honors `RUST_LOG` via [`EnvFilter`]; falls back to `info` when unset.
/// Safe to call more than once — later calls are no-ops if a global
/// subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true));
    let _ = tracing::subscriber::set_global_default(subscriber);
}
