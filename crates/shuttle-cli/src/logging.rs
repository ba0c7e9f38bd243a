//! Logging setup for the binary. The library only emits `tracing` events.

use tracing_subscriber::EnvFilter;

/// Console logging, `info` unless `RUST_LOG` says otherwise.
pub fn init(verbose: bool) {
    let default = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
