use super::tunnel::TunnelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory, per-tunnel traffic snapshot. Not persisted; historical
/// queries over time ranges return an empty sequence (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeTrafficStats {
    pub tunnel_id: TunnelId,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub active_connections: u32,
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
    pub last_update: DateTime<Utc>,
}

impl RealtimeTrafficStats {
    pub fn zero(tunnel_id: TunnelId) -> Self {
        Self {
            tunnel_id,
            bytes_in: 0,
            bytes_out: 0,
            active_connections: 0,
            bytes_in_per_sec: 0.0,
            bytes_out_per_sec: 0.0,
            last_update: Utc::now(),
        }
    }
}
