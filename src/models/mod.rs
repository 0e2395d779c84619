pub mod host;
pub mod log;
pub mod traffic;
pub mod tunnel;

pub use host::{AuthKind, Host, HostId, HostStatus};
pub use log::{ConnectionLog, LogEvent, LogId};
pub use traffic::RealtimeTrafficStats;
pub use tunnel::{Tunnel, TunnelId, TunnelKind, TunnelStatus};
