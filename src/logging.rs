//! Logging initialization for binaries embedding the engine.
//!
//! The engine itself never installs a subscriber. A library consumer
//! that already has `tracing` wired up is left alone. This is only for
//! the bundled demo binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the default filter (`info`, `debug` for this crate).
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a custom default level.
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},ssh_tunnel_manager=debug")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_line_number(true))
        .init();

    tracing::info!("ssh tunnel engine logging initialized");
}
