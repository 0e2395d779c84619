//! Bridges `ssh::TunnelObserver` (fired synchronously from inside the
//! `russh` handler) into the repository's connection log and the
//! traffic meter, both of which are async. Keeping `ssh` ignorant of
//! `Repository`/`TrafficMeter` avoids a dependency cycle between the two
//! modules.

use crate::models::{ConnectionLog, LogEvent, TunnelId};
use crate::repository::Repository;
use crate::ssh::TunnelObserver;
use crate::traffic_meter::TrafficMeter;
use std::sync::Arc;

pub struct EngineObserver {
    repo: Arc<dyn Repository>,
    traffic: Arc<TrafficMeter>,
}

impl EngineObserver {
    pub fn new(repo: Arc<dyn Repository>, traffic: Arc<TrafficMeter>) -> Self {
        Self { repo, traffic }
    }
}

impl TunnelObserver for EngineObserver {
    fn on_connect(&self, tunnel_id: TunnelId) {
        let repo = self.repo.clone();
        let traffic = self.traffic.clone();
        tokio::spawn(async move {
            traffic.increment_connection(tunnel_id).await;
            let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Connect, None)).await;
        });
    }

    fn on_disconnect(&self, tunnel_id: TunnelId, bytes_in: u64, bytes_out: u64) {
        let repo = self.repo.clone();
        let traffic = self.traffic.clone();
        tokio::spawn(async move {
            traffic.log_traffic(tunnel_id, bytes_in, bytes_out).await;
            traffic.decrement_connection(tunnel_id).await;
            let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Disconnect, None)).await;
        });
    }

    fn on_error(&self, tunnel_id: TunnelId, message: String) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Error, Some(message))).await;
        });
    }
}
