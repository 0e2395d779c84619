//! In-memory per-tunnel traffic counters (C6).
//!
//! Grounded on the teacher's `TrafficCounter` (`src/services/tunnel_service.rs`,
//! atomic bytes_sent/bytes_received for a single tunnel) generalized to a
//! process-wide map keyed by tunnel id, the way `SessionManager::sync_traffic_from_tunnels`
//! aggregates per-session traffic in `session_manager.rs`. Historical
//! persistence is out of scope (§4.6); queries over time ranges are not
//! offered by this module at all.

use crate::models::{RealtimeTrafficStats, TunnelId};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Counters {
    bytes_in: u64,
    bytes_out: u64,
    active_connections: u32,
    last_update: std::time::Instant,
    last_bytes_in: u64,
    last_bytes_out: u64,
    last_update_wall: chrono::DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        Self {
            bytes_in: 0,
            bytes_out: 0,
            active_connections: 0,
            last_update: std::time::Instant::now(),
            last_bytes_in: 0,
            last_bytes_out: 0,
            last_update_wall: Utc::now(),
        }
    }

    fn snapshot(&self, tunnel_id: TunnelId) -> RealtimeTrafficStats {
        let elapsed = self.last_update.elapsed().as_secs_f64().max(f64::EPSILON);
        RealtimeTrafficStats {
            tunnel_id,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            active_connections: self.active_connections,
            bytes_in_per_sec: (self.bytes_in - self.last_bytes_in) as f64 / elapsed,
            bytes_out_per_sec: (self.bytes_out - self.last_bytes_out) as f64 / elapsed,
            last_update: self.last_update_wall,
        }
    }
}

/// Process-wide traffic meter. Cheap to clone (an `Arc` internally via
/// the engine that owns it); every method takes `&self`.
#[derive(Default)]
pub struct TrafficMeter {
    counters: RwLock<HashMap<TunnelId, Counters>>,
}

impl TrafficMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to cumulative totals and recomputes instantaneous rates from
    /// the delta since the last update.
    pub async fn log_traffic(&self, tunnel_id: TunnelId, bytes_in: u64, bytes_out: u64) {
        let mut counters = self.counters.write().await;
        let entry = counters.entry(tunnel_id).or_insert_with(Counters::new);
        entry.last_bytes_in = entry.bytes_in;
        entry.last_bytes_out = entry.bytes_out;
        entry.bytes_in += bytes_in;
        entry.bytes_out += bytes_out;
        entry.last_update = std::time::Instant::now();
        entry.last_update_wall = Utc::now();
    }

    pub async fn increment_connection(&self, tunnel_id: TunnelId) {
        let mut counters = self.counters.write().await;
        counters.entry(tunnel_id).or_insert_with(Counters::new).active_connections += 1;
    }

    pub async fn decrement_connection(&self, tunnel_id: TunnelId) {
        let mut counters = self.counters.write().await;
        if let Some(entry) = counters.get_mut(&tunnel_id) {
            entry.active_connections = entry.active_connections.saturating_sub(1);
        }
    }

    pub async fn stats(&self, tunnel_id: TunnelId) -> RealtimeTrafficStats {
        let counters = self.counters.read().await;
        counters
            .get(&tunnel_id)
            .map(|c| c.snapshot(tunnel_id))
            .unwrap_or_else(|| RealtimeTrafficStats::zero(tunnel_id))
    }

    /// Drop all counters for a tunnel, e.g. when it is deleted.
    pub async fn reset(&self, tunnel_id: TunnelId) {
        self.counters.write().await.remove(&tunnel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cumulative_totals_accumulate() {
        let meter = TrafficMeter::new();
        meter.log_traffic(1, 100, 50).await;
        meter.log_traffic(1, 200, 25).await;
        let stats = meter.stats(1).await;
        assert_eq!(stats.bytes_in, 300);
        assert_eq!(stats.bytes_out, 75);
    }

    #[tokio::test]
    async fn connection_count_never_goes_negative() {
        let meter = TrafficMeter::new();
        meter.decrement_connection(1).await;
        assert_eq!(meter.stats(1).await.active_connections, 0);
        meter.increment_connection(1).await;
        meter.decrement_connection(1).await;
        meter.decrement_connection(1).await;
        assert_eq!(meter.stats(1).await.active_connections, 0);
    }

    #[tokio::test]
    async fn unknown_tunnel_returns_zeroed_stats() {
        let meter = TrafficMeter::new();
        let stats = meter.stats(42).await;
        assert_eq!(stats.bytes_in, 0);
        assert_eq!(stats.active_connections, 0);
    }
}
