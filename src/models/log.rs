use super::tunnel::TunnelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type LogId = i64;

/// Append-only per-tunnel connection log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionLog {
    pub id: LogId,
    pub tunnel_id: TunnelId,
    pub event: LogEvent,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionLog {
    pub fn new(tunnel_id: TunnelId, event: LogEvent, message: impl Into<Option<String>>) -> Self {
        Self {
            id: 0,
            tunnel_id,
            event,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogEvent {
    Connect,
    Disconnect,
    Error,
    Start,
    Stop,
}
