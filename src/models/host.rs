use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type HostId = i64;

/// A configured SSH host. Password, private-key, and passphrase fields
/// hold ciphertext once persisted; the crypto box (de)serializes them at
/// the host service boundary, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth_kind: AuthKind,

    /// Ciphertext, or plaintext for legacy rows (§4.4 tolerant decrypt).
    #[serde(default)]
    pub password: String,
    /// Ciphertext PEM, or plaintext for legacy rows.
    #[serde(default)]
    pub private_key: String,
    /// Optional on-disk fallback used only when `private_key` is empty.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Ciphertext, or plaintext for legacy rows.
    #[serde(default)]
    pub passphrase: String,

    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: HostStatus,
    pub last_check: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Host {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            hostname: hostname.into(),
            port: 22,
            username: username.into(),
            auth_kind: AuthKind::Password,
            password: String::new(),
            private_key: String::new(),
            key_path: None,
            passphrase: String::new(),
            description: String::new(),
            status: HostStatus::Inactive,
            last_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Auth-kind's required secret fields are present, before encryption.
    pub fn has_required_secrets(&self) -> bool {
        match self.auth_kind {
            AuthKind::Password => !self.password.is_empty(),
            AuthKind::Key => !self.private_key.is_empty() || self.key_path.is_some(),
            AuthKind::KeyWithPassphrase => {
                (!self.private_key.is_empty() || self.key_path.is_some()) && !self.passphrase.is_empty()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Password,
    Key,
    KeyWithPassphrase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Inactive,
    Active,
    Error,
}
