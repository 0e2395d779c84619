use super::host::HostId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TunnelId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: TunnelId,
    pub host_id: HostId,
    pub name: String,
    pub kind: TunnelKind,

    #[serde(default = "default_local_address")]
    pub local_address: String,
    pub local_port: u16,

    /// Required for local/remote forward; ignored for dynamic.
    pub remote_address: Option<String>,
    /// Required for local/remote forward; ignored for dynamic.
    pub remote_port: Option<u16>,

    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TunnelStatus,
    #[serde(default)]
    pub auto_start: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_local_address() -> String {
    "127.0.0.1".to_string()
}

impl Tunnel {
    pub fn new_local_forward(
        host_id: HostId,
        name: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self::new_with_kind(host_id, name, TunnelKind::LocalForward, local_port)
            .with_remote(remote_host, remote_port)
    }

    /// Despite the name, `createMultipleLocalForwards` builds records of
    /// kind `remote_forward`. The external name is kept, the internal
    /// kind is not (see DESIGN.md, resolved open question).
    pub fn new_remote_forward(
        host_id: HostId,
        name: impl Into<String>,
        remote_port: u16,
        local_host: impl Into<String>,
        local_port: u16,
    ) -> Self {
        let mut t = Self::new_with_kind(host_id, name, TunnelKind::RemoteForward, local_port);
        t.local_address = local_host.into();
        t.remote_address = Some("0.0.0.0".to_string());
        t.remote_port = Some(remote_port);
        t
    }

    pub fn new_dynamic(host_id: HostId, name: impl Into<String>, local_port: u16) -> Self {
        Self::new_with_kind(host_id, name, TunnelKind::Dynamic, local_port)
    }

    fn new_with_kind(host_id: HostId, name: impl Into<String>, kind: TunnelKind, local_port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            host_id,
            name: name.into(),
            kind,
            local_address: default_local_address(),
            local_port,
            remote_address: None,
            remote_port: None,
            description: String::new(),
            status: TunnelStatus::Inactive,
            auto_start: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_remote(mut self, remote_host: impl Into<String>, remote_port: u16) -> Self {
        self.remote_address = Some(remote_host.into());
        self.remote_port = Some(remote_port);
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Kind-specific required fields are present (§3).
    pub fn has_required_fields(&self) -> bool {
        match self.kind {
            TunnelKind::LocalForward | TunnelKind::RemoteForward => {
                self.remote_address.as_deref().is_some_and(|a| !a.is_empty()) && self.remote_port.is_some()
            }
            TunnelKind::Dynamic => true,
        }
    }

    /// Effective remote-address for a remote_forward, defaulting blank to
    /// 0.0.0.0 per §3.
    pub fn effective_remote_address(&self) -> String {
        match self.remote_address.as_deref() {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TunnelKind {
    LocalForward,
    RemoteForward,
    Dynamic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    #[default]
    Inactive,
    Active,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_forward_defaults_blank_remote_address() {
        let mut t = Tunnel::new_remote_forward(1, "db", 5432, "localhost", 5432);
        t.remote_address = Some(String::new());
        assert_eq!(t.effective_remote_address(), "0.0.0.0");
    }

    #[test]
    fn local_forward_requires_remote_fields() {
        let t = Tunnel::new_local_forward(1, "db", 13306, "10.0.0.5", 3306);
        assert!(t.has_required_fields());
        let mut missing = t.clone();
        missing.remote_address = None;
        assert!(!missing.has_required_fields());
    }

    #[test]
    fn dynamic_has_no_required_remote_fields() {
        let t = Tunnel::new_dynamic(1, "socks", 1080);
        assert!(t.has_required_fields());
    }
}
