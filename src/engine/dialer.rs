//! Bridges the SOCKS5 server's dialer trait onto a tunnel's SSH session.
//!
//! Grounded on the teacher's `TunnelService::handle_socks_connection`,
//! which dials the remote side via `session_guard.channel_open_direct_tcpip`
//! under a `Mutex<SshSession>` guard, the same locking shape used here.

use crate::socks5::{AsyncDuplex, Socks5Dialer};
use crate::ssh::SshSession;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SshSocks5Dialer {
    session: Arc<Mutex<SshSession>>,
}

impl SshSocks5Dialer {
    pub fn new(session: Arc<Mutex<SshSession>>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Socks5Dialer for SshSocks5Dialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<Box<dyn AsyncDuplex>> {
        let session = self.session.lock().await;
        crate::ssh::open_direct_tcpip(&session, host, port)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}
