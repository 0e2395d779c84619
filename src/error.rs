//! Error kinds shared across the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Every error kind the core must distinguish.
///
/// Transient per-connection failures inside a running relay are *not*
/// represented here; they are logged as a `ConnectionLog` event and the
/// relay task simply exits. This enum is for operations that return to a
/// caller: create/start/stop/update/delete, the crypto box, and the
/// exporter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Decrypting a field whose bytes are not valid URL-safe base64. Not
    /// fatal by itself; callers on the tolerant read path treat this as
    /// "pass the field through unchanged".
    #[error("ciphertext is not in the expected format")]
    CryptoFormat,

    #[error("ciphertext integrity error: {0}")]
    CryptoIntegrity(String),

    #[error("ssh dial failed: {0}")]
    SshDial(String),

    #[error("ssh authentication failed: {0}")]
    SshAuth(String),

    #[error("ssh session error: {0}")]
    SshSession(String),

    #[error("ssh remote listen failed: {0}")]
    SshListen(String),

    #[error("ssh channel open failed: {0}")]
    SshChannelOpen(String),

    #[error("cannot bind {0}")]
    Bind(String),

    #[error("no active SOCKS5 tunnels found")]
    NoActiveSocks5,

    #[error("no available port in the requested range")]
    NoAvailablePort,

    #[error("tunnel is not running")]
    NotRunning,

    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// A short, user-facing summary, independent of the `Display` impl's
    /// more technical wording.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(m) => format!("Invalid input: {m}"),
            EngineError::Conflict(m) => format!("Conflict: {m}"),
            EngineError::NotFound(m) => format!("Not found: {m}"),
            EngineError::CryptoFormat => "Stored value is not ciphertext".to_string(),
            EngineError::CryptoIntegrity(m) => format!("Could not decrypt secret: {m}"),
            EngineError::SshDial(m) => format!("Could not reach host: {m}"),
            EngineError::SshAuth(m) => format!("Authentication failed: {m}"),
            EngineError::SshSession(m) => format!("SSH session error: {m}"),
            EngineError::SshListen(m) => format!("Could not open remote listener: {m}"),
            EngineError::SshChannelOpen(m) => format!("Could not open SSH channel: {m}"),
            EngineError::Bind(m) => format!("Could not bind: {m}"),
            EngineError::NoActiveSocks5 => "No active SOCKS5 tunnels found".to_string(),
            EngineError::NoAvailablePort => "No available port found".to_string(),
            EngineError::NotRunning => "Tunnel is not running".to_string(),
            EngineError::AlreadyRunning => "Tunnel is already running".to_string(),
            EngineError::Io(e) => format!("I/O error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_is_distinct_from_display() {
        let err = EngineError::NotRunning;
        assert_eq!(err.user_message(), "Tunnel is not running");
        assert_eq!(err.to_string(), "tunnel is not running");
    }
}
