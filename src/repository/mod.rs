//! Abstract persistence for hosts, tunnels, and connection logs (C7).
//!
//! The engine depends only on this trait. `memory::InMemoryRepository` is
//! a reference adapter used by this crate's own tests and available to
//! embedders who haven't wired a database yet. It is not the contract
//! itself.

pub mod memory;

use crate::error::Result;
use crate::models::{ConnectionLog, Host, HostId, Tunnel, TunnelId, TunnelStatus};
use async_trait::async_trait;

#[async_trait]
pub trait Repository: Send + Sync {
    // Hosts
    async fn create_host(&self, host: Host) -> Result<Host>;
    async fn get_host(&self, id: HostId) -> Result<Host>;
    async fn get_host_by_name(&self, name: &str) -> Result<Option<Host>>;
    async fn list_hosts(&self) -> Result<Vec<Host>>;
    async fn update_host(&self, host: Host) -> Result<Host>;
    /// Rejects deletion when any tunnel references the host (§3).
    async fn delete_host(&self, id: HostId) -> Result<()>;
    async fn update_host_status(&self, id: HostId, status: crate::models::HostStatus) -> Result<()>;

    // Tunnels
    async fn create_tunnel(&self, tunnel: Tunnel) -> Result<Tunnel>;
    async fn get_tunnel(&self, id: TunnelId) -> Result<Tunnel>;
    async fn list_tunnels(&self) -> Result<Vec<Tunnel>>;
    async fn list_tunnels_by_host(&self, host_id: HostId) -> Result<Vec<Tunnel>>;
    async fn list_tunnels_by_status(&self, status: TunnelStatus) -> Result<Vec<Tunnel>>;
    async fn list_auto_start_tunnels(&self) -> Result<Vec<Tunnel>>;
    async fn update_tunnel(&self, tunnel: Tunnel) -> Result<Tunnel>;
    async fn update_tunnel_status(&self, id: TunnelId, status: TunnelStatus) -> Result<()>;
    /// Cascades connection-log deletion (§4.7).
    async fn delete_tunnel(&self, id: TunnelId) -> Result<()>;

    // Connection logs
    async fn append_log(&self, log: ConnectionLog) -> Result<ConnectionLog>;
    /// Newest-first; `limit` of zero or negative means unlimited.
    async fn list_logs_by_tunnel(&self, tunnel_id: TunnelId, limit: i64) -> Result<Vec<ConnectionLog>>;
}
