//! Typed configuration the embedder supplies when constructing the engine.
//!
//! Loading these values from a file or environment is the embedder's job;
//! this struct only fixes the shape and the default constants.

use std::time::Duration;

/// Behavioral constants and secrets the tunnel engine needs at construction
/// time. Defaults match the constants named in the concurrency/resource
/// model.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UTF-8 key string the crypto box derives its AES-256 key from.
    pub crypto_key: String,

    /// Default bind address used when a tunnel doesn't specify one.
    pub default_bind_address: String,

    /// SSH dial timeout.
    pub ssh_dial_timeout: Duration,
    /// `checkServiceHealth` dial timeout.
    pub health_check_timeout: Duration,
    /// Accept-loop poll interval on listeners that don't natively observe
    /// cancellation (local binds).
    pub accept_poll_interval: Duration,
    /// Pause after closing a listener, before declaring the port released.
    pub post_stop_settle: Duration,
    /// Pause between `stop` and `start` inside `restart`.
    pub restart_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crypto_key: String::new(),
            default_bind_address: "127.0.0.1".to_string(),
            ssh_dial_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            accept_poll_interval: Duration::from_secs(1),
            post_stop_settle: Duration::from_millis(200),
            restart_settle: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn with_crypto_key(mut self, key: impl Into<String>) -> Self {
        self.crypto_key = key.into();
        self
    }
}
