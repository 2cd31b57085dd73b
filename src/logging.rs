//! Tracing setup for the agent binary.

use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` overrides the verbosity flag when set.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("portgate={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
