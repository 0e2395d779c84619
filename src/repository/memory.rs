//! In-memory reference implementation of [`Repository`] (A4).
//!
//! Grounded on the teacher's `ConfigService` (TOML-file CRUD) and
//! `LogService` (bounded in-memory log store) for the operation shapes;
//! this adapter keeps everything in `RwLock`-protected maps instead of a
//! file, and bounds each tunnel's log history the way `LogService`
//! bounds its own `VecDeque` by `max_memory_logs` (§3.1).

use super::Repository;
use crate::error::{EngineError, Result};
use crate::models::{ConnectionLog, Host, HostId, HostStatus, Tunnel, TunnelId, TunnelStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// Per-tunnel log history bound; oldest entries are evicted on overflow.
const MAX_LOGS_PER_TUNNEL: usize = 2_000;

pub struct InMemoryRepository {
    hosts: RwLock<HashMap<HostId, Host>>,
    tunnels: RwLock<HashMap<TunnelId, Tunnel>>,
    logs: RwLock<HashMap<TunnelId, Vec<ConnectionLog>>>,
    next_host_id: AtomicI64,
    next_tunnel_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            tunnels: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            next_host_id: AtomicI64::new(1),
            next_tunnel_id: AtomicI64::new(1),
            next_log_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_host(&self, mut host: Host) -> Result<Host> {
        let mut hosts = self.hosts.write().await;
        if hosts.values().any(|h| h.name == host.name) {
            return Err(EngineError::Conflict(format!("host name '{}' already exists", host.name)));
        }
        host.id = self.next_host_id.fetch_add(1, Ordering::Relaxed);
        hosts.insert(host.id, host.clone());
        Ok(host)
    }

    async fn get_host(&self, id: HostId) -> Result<Host> {
        self.hosts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("host {id}")))
    }

    async fn get_host_by_name(&self, name: &str) -> Result<Option<Host>> {
        Ok(self.hosts.read().await.values().find(|h| h.name == name).cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(self.hosts.read().await.values().cloned().collect())
    }

    async fn update_host(&self, host: Host) -> Result<Host> {
        let mut hosts = self.hosts.write().await;
        if !hosts.contains_key(&host.id) {
            return Err(EngineError::NotFound(format!("host {}", host.id)));
        }
        if hosts.values().any(|h| h.id != host.id && h.name == host.name) {
            return Err(EngineError::Conflict(format!("host name '{}' already exists", host.name)));
        }
        hosts.insert(host.id, host.clone());
        Ok(host)
    }

    async fn delete_host(&self, id: HostId) -> Result<()> {
        let referenced = self.tunnels.read().await.values().any(|t| t.host_id == id);
        if referenced {
            return Err(EngineError::Conflict(format!(
                "host {id} is referenced by one or more tunnels"
            )));
        }
        self.hosts
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("host {id}")))
    }

    async fn update_host_status(&self, id: HostId, status: HostStatus) -> Result<()> {
        let mut hosts = self.hosts.write().await;
        let host = hosts.get_mut(&id).ok_or_else(|| EngineError::NotFound(format!("host {id}")))?;
        host.status = status;
        host.last_check = Some(chrono::Utc::now());
        Ok(())
    }

    async fn create_tunnel(&self, mut tunnel: Tunnel) -> Result<Tunnel> {
        let mut tunnels = self.tunnels.write().await;
        let clash = tunnels.values().any(|t| {
            t.local_address == tunnel.local_address && t.local_port == tunnel.local_port
        });
        if clash {
            return Err(EngineError::Conflict(format!(
                "{}:{} is already used by another tunnel",
                tunnel.local_address, tunnel.local_port
            )));
        }
        if tunnel.kind == crate::models::TunnelKind::RemoteForward {
            let remote_clash = tunnels.values().any(|t| {
                t.kind == crate::models::TunnelKind::RemoteForward
                    && t.host_id == tunnel.host_id
                    && t.effective_remote_address() == tunnel.effective_remote_address()
                    && t.remote_port == tunnel.remote_port
            });
            if remote_clash {
                return Err(EngineError::Conflict(
                    "remote address/port already used by another tunnel on this host".to_string(),
                ));
            }
        }
        tunnel.id = self.next_tunnel_id.fetch_add(1, Ordering::Relaxed);
        tunnels.insert(tunnel.id, tunnel.clone());
        Ok(tunnel)
    }

    async fn get_tunnel(&self, id: TunnelId) -> Result<Tunnel> {
        self.tunnels
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("tunnel {id}")))
    }

    async fn list_tunnels(&self) -> Result<Vec<Tunnel>> {
        Ok(self.tunnels.read().await.values().cloned().collect())
    }

    async fn list_tunnels_by_host(&self, host_id: HostId) -> Result<Vec<Tunnel>> {
        Ok(self
            .tunnels
            .read()
            .await
            .values()
            .filter(|t| t.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn list_tunnels_by_status(&self, status: TunnelStatus) -> Result<Vec<Tunnel>> {
        Ok(self
            .tunnels
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn list_auto_start_tunnels(&self) -> Result<Vec<Tunnel>> {
        Ok(self
            .tunnels
            .read()
            .await
            .values()
            .filter(|t| t.auto_start)
            .cloned()
            .collect())
    }

    async fn update_tunnel(&self, tunnel: Tunnel) -> Result<Tunnel> {
        let mut tunnels = self.tunnels.write().await;
        if !tunnels.contains_key(&tunnel.id) {
            return Err(EngineError::NotFound(format!("tunnel {}", tunnel.id)));
        }
        let clash = tunnels.values().any(|t| {
            t.id != tunnel.id && t.local_address == tunnel.local_address && t.local_port == tunnel.local_port
        });
        if clash {
            return Err(EngineError::Conflict(format!(
                "{}:{} is already used by another tunnel",
                tunnel.local_address, tunnel.local_port
            )));
        }
        tunnels.insert(tunnel.id, tunnel.clone());
        Ok(tunnel)
    }

    async fn update_tunnel_status(&self, id: TunnelId, status: TunnelStatus) -> Result<()> {
        let mut tunnels = self.tunnels.write().await;
        let tunnel = tunnels.get_mut(&id).ok_or_else(|| EngineError::NotFound(format!("tunnel {id}")))?;
        tunnel.status = status;
        tunnel.touch();
        Ok(())
    }

    async fn delete_tunnel(&self, id: TunnelId) -> Result<()> {
        self.tunnels
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("tunnel {id}")))?;
        self.logs.write().await.remove(&id);
        Ok(())
    }

    async fn append_log(&self, mut log: ConnectionLog) -> Result<ConnectionLog> {
        log.id = self.next_log_id.fetch_add(1, Ordering::Relaxed);
        let mut logs = self.logs.write().await;
        let entries = logs.entry(log.tunnel_id).or_default();
        entries.push(log.clone());
        if entries.len() > MAX_LOGS_PER_TUNNEL {
            let overflow = entries.len() - MAX_LOGS_PER_TUNNEL;
            entries.drain(0..overflow);
        }
        Ok(log)
    }

    async fn list_logs_by_tunnel(&self, tunnel_id: TunnelId, limit: i64) -> Result<Vec<ConnectionLog>> {
        let logs = self.logs.read().await;
        let mut entries = logs.get(&tunnel_id).cloned().unwrap_or_default();
        entries.reverse(); // newest-first
        if limit > 0 {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionLog, Host, LogEvent, Tunnel};

    #[tokio::test]
    async fn host_name_must_be_unique() {
        let repo = InMemoryRepository::new();
        repo.create_host(Host::new("home", "example.com", "alice")).await.unwrap();
        let err = repo
            .create_host(Host::new("home", "other.example.com", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_referenced_host_is_rejected() {
        let repo = InMemoryRepository::new();
        let host = repo.create_host(Host::new("home", "example.com", "alice")).await.unwrap();
        repo.create_tunnel(Tunnel::new_dynamic(host.id, "socks", 1080)).await.unwrap();
        let err = repo.delete_host(host.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    /// Invariant 2: no two tunnels may coexist on the same local address/port.
    #[tokio::test]
    async fn duplicate_local_bind_is_rejected() {
        let repo = InMemoryRepository::new();
        let host = repo.create_host(Host::new("home", "example.com", "alice")).await.unwrap();
        repo.create_tunnel(Tunnel::new_dynamic(host.id, "socks-a", 1080)).await.unwrap();
        let err = repo
            .create_tunnel(Tunnel::new_dynamic(host.id, "socks-b", 1080))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn logs_are_bounded_and_newest_first() {
        let repo = InMemoryRepository::new();
        for i in 0..(MAX_LOGS_PER_TUNNEL + 10) {
            repo.append_log(ConnectionLog::new(1, LogEvent::Connect, Some(format!("entry {i}"))))
                .await
                .unwrap();
        }
        let logs = repo.list_logs_by_tunnel(1, 0).await.unwrap();
        assert_eq!(logs.len(), MAX_LOGS_PER_TUNNEL);
        assert!(logs[0].message.as_deref().unwrap().ends_with(&(MAX_LOGS_PER_TUNNEL + 9).to_string()));
    }

    #[tokio::test]
    async fn delete_tunnel_cascades_logs() {
        let repo = InMemoryRepository::new();
        let host = repo.create_host(Host::new("home", "example.com", "alice")).await.unwrap();
        let tunnel = repo.create_tunnel(Tunnel::new_dynamic(host.id, "socks", 1080)).await.unwrap();
        repo.append_log(ConnectionLog::new(tunnel.id, LogEvent::Start, None)).await.unwrap();
        repo.delete_tunnel(tunnel.id).await.unwrap();
        let logs = repo.list_logs_by_tunnel(tunnel.id, 0).await.unwrap();
        assert!(logs.is_empty());
    }
}
