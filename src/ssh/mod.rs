//! SSH client construction (§4.4 component design note) and the
//! `russh::client::Handler` implementation that backs every active
//! tunnel.
//!
//! Grounded on the teacher's `services/ssh_service.rs`: same
//! `SshClientHandler` shape (`remote_forwards` shared behind a
//! `RwLock`, `check_server_key`/`server_channel_open_forwarded_tcpip`
//! callbacks), narrowed to the permissive-only host-key policy the
//! specification calls for and driven by `Host`/`AuthKind` instead of
//! the teacher's `SshConnection`/`AuthMethod`. The forwarded-tcpip relay
//! uses `Channel::into_stream()`, the pattern `aitechnerd-sshore`'s
//! `src/ssh/tunnel.rs` (`run_local_forward`) uses for its own
//! direct-tcpip channels.

use crate::error::{EngineError, Result};
use crate::models::{AuthKind, Host, TunnelId};
use russh::client::{self, AuthResult, Handle, Msg};
use russh::keys::ssh_key::HashAlg;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, Disconnect};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A connected SSH session, as handed back to the engine.
pub type SshSession = Handle<SshClientHandler>;

/// The target a `remote_forward` tunnel dials locally when the server
/// opens a `forwarded-tcpip` channel for it, plus the tunnel id for
/// observer callbacks.
#[derive(Clone)]
pub struct RemoteForwardTarget {
    pub local_host: String,
    pub local_port: u16,
    pub tunnel_id: TunnelId,
}

/// `remote_port -> target`, consulted when the server opens a
/// `forwarded-tcpip` channel.
pub type RemoteForwardMap = Arc<RwLock<HashMap<u16, RemoteForwardTarget>>>;

/// Notified of connect/disconnect/error events on a tunnel whose
/// connections this session handles on the server's initiative
/// (`remote_forward`'s forwarded-tcpip channels). The engine implements
/// this to bridge into the repository's connection log and the traffic
/// meter without this module depending on either directly.
pub trait TunnelObserver: Send + Sync {
    fn on_connect(&self, tunnel_id: TunnelId);
    fn on_disconnect(&self, tunnel_id: TunnelId, bytes_in: u64, bytes_out: u64);
    fn on_error(&self, tunnel_id: TunnelId, message: String);
}

/// Dial `host`, using `password`/`private_key`/`passphrase` already
/// decrypted by the caller (never logged). `remote_forwards` may be
/// populated before or after connecting; the forwarded-tcpip handler
/// reads it on every incoming connection, so entries added after
/// `dial` returns still take effect. `dial_timeout` is the caller's
/// `EngineConfig::ssh_dial_timeout` (30 s by default). `observer`, when
/// supplied, is notified of every connection this session relays on the
/// server's initiative. A session dialled for `local_forward`/
/// `dynamic`/probing (which drive their own connections) passes `None`.
pub async fn dial(
    host: &Host,
    password: &str,
    private_key: &str,
    passphrase: &str,
    remote_forwards: RemoteForwardMap,
    dial_timeout: Duration,
    cancel: CancellationToken,
    observer: Option<Arc<dyn TunnelObserver>>,
) -> Result<SshSession> {
    let handler = SshClientHandler::new(remote_forwards, cancel, observer);
    let config = client::Config {
        inactivity_timeout: Some(Duration::from_secs(300)),
        ..<client::Config as Default>::default()
    };

    let connect_fut = client::connect(Arc::new(config), (host.hostname.as_str(), host.port), handler);
    let mut session = tokio::time::timeout(dial_timeout, connect_fut)
        .await
        .map_err(|_| EngineError::SshDial(format!("timed out after {dial_timeout:?}")))?
        .map_err(|e| EngineError::SshDial(e.to_string()))?;

    let auth_res = match host.auth_kind {
        AuthKind::Password => session
            .authenticate_password(&host.username, password)
            .await
            .map_err(|e| EngineError::SshAuth(e.to_string()))?,
        AuthKind::Key | AuthKind::KeyWithPassphrase => {
            let pem = resolve_key_material(host, private_key).await?;
            let key = load_private_key(&pem, passphrase, host.auth_kind)?;
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            session
                .authenticate_publickey(&host.username, key_with_alg)
                .await
                .map_err(|e| EngineError::SshAuth(e.to_string()))?
        }
    };

    if !matches!(auth_res, AuthResult::Success) {
        return Err(EngineError::SshAuth("server rejected credentials".to_string()));
    }

    Ok(session)
}

/// `host.key_path` is a file-backed fallback, consulted only when the
/// (already-decrypted) `private_key` field is empty (§3.2); ciphertext
/// wins when both are present.
async fn resolve_key_material(host: &Host, private_key: &str) -> Result<String> {
    if !private_key.is_empty() {
        return Ok(private_key.to_string());
    }
    let Some(path) = &host.key_path else {
        return Err(EngineError::Validation(
            "auth_kind requires private_key or key_path, neither is set".to_string(),
        ));
    };
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::Validation(format!("key_path {} unreadable: {e}", path.display())))
}

fn load_private_key(private_key_pem: &str, passphrase: &str, auth_kind: AuthKind) -> Result<PrivateKey> {
    let key = PrivateKey::from_openssh(private_key_pem.trim())
        .map_err(|e| EngineError::SshAuth(format!("failed to parse private key: {e}")))?;

    if matches!(auth_kind, AuthKind::KeyWithPassphrase) {
        key.decrypt(passphrase.as_bytes())
            .map_err(|e| EngineError::SshAuth(format!("failed to decrypt private key: {e}")))
    } else {
        Ok(key)
    }
}

/// Disconnect a session cleanly; best-effort, errors are logged by the
/// caller and never fatal to a stop sequence.
pub async fn disconnect(session: &mut SshSession) -> Result<()> {
    session
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
        .map_err(|e| EngineError::SshSession(e.to_string()))
}

/// Open a direct-tcpip channel to `host:port` and hand back the plain
/// `AsyncRead + AsyncWrite` stream view of it (`Channel::into_stream()`),
/// the same adapter `aitechnerd-sshore` uses for its local-forward and
/// SFTP channels. Used by the engine for `local_forward` relays and by
/// the SOCKS5 dialer for `dynamic` tunnels.
pub async fn open_direct_tcpip(
    session: &SshSession,
    host: &str,
    port: u16,
) -> Result<Box<dyn crate::socks5::AsyncDuplex>> {
    let channel = session
        .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
        .await
        .map_err(|e| EngineError::SshChannelOpen(e.to_string()))?;
    Ok(Box::new(channel.into_stream()))
}

/// Request a remote listener at `address:port` on the connected server
/// (§4.1 `remote_forward`). Returns the port the server actually bound
/// (0 means "same as requested" for this russh version).
pub async fn tcpip_forward(session: &SshSession, address: &str, port: u16) -> Result<u32> {
    session
        .tcpip_forward(address, port as u32)
        .await
        .map_err(|e| EngineError::SshListen(e.to_string()))
}

/// Cancel a previously-requested remote listener; best-effort, called
/// during `stop`.
pub async fn cancel_tcpip_forward(session: &SshSession, address: &str, port: u16) -> Result<()> {
    session
        .cancel_tcpip_forward(address, port as u32)
        .await
        .map_err(|e| EngineError::SshListen(e.to_string()))
}

/// The permissive, forwarding-aware handler every session is built with.
/// Host-key verification is deliberately absent (§9): the management
/// plane is local-only by design, and a strict mode would be a new
/// callback here, not a different handler type.
#[derive(Clone)]
pub struct SshClientHandler {
    remote_forwards: RemoteForwardMap,
    cancel: CancellationToken,
    observer: Option<Arc<dyn TunnelObserver>>,
}

impl SshClientHandler {
    pub fn new(
        remote_forwards: RemoteForwardMap,
        cancel: CancellationToken,
        observer: Option<Arc<dyn TunnelObserver>>,
    ) -> Self {
        Self { remote_forwards, cancel, observer }
    }

    fn fingerprint(key: &PublicKey) -> String {
        key.fingerprint(HashAlg::Sha256).to_string()
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let fingerprint = Self::fingerprint(server_public_key);
        async move {
            tracing::debug!(%fingerprint, "accepting server host key (permissive policy)");
            Ok(true)
        }
    }

    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send {
        let originator_address = originator_address.to_string();
        let remote_forwards = self.remote_forwards.clone();
        let observer = self.observer.clone();
        let cancel = self.cancel.clone();

        async move {
            tracing::debug!(
                %originator_address,
                originator_port,
                connected_port,
                "forwarded-tcpip connection from server"
            );

            let target = {
                let forwards = remote_forwards.read().await;
                forwards.get(&(connected_port as u16)).cloned()
            };

            let Some(target) = target else {
                tracing::warn!(connected_port, "no remote_forward registered for this port");
                return Err(russh::Error::Disconnect);
            };

            let local_addr = format!("{}:{}", target.local_host, target.local_port);
            match tokio::net::TcpStream::connect(&local_addr).await {
                Ok(stream) => {
                    tokio::spawn(async move {
                        if let Some(o) = &observer {
                            o.on_connect(target.tunnel_id);
                        }
                        let channel_stream = channel.into_stream();
                        let (bytes_in, bytes_out) =
                            crate::relay::run(stream, channel_stream, cancel).await;
                        if let Some(o) = &observer {
                            o.on_disconnect(target.tunnel_id, bytes_in, bytes_out);
                        }
                    });
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(%local_addr, error = %e, "remote_forward target unreachable");
                    if let Some(o) = &observer {
                        o.on_error(target.tunnel_id, format!("dial {local_addr} failed: {e}"));
                    }
                    Err(russh::Error::Disconnect)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Host;

    fn host() -> Host {
        Host::new("home", "example.com", "alice")
    }

    #[tokio::test]
    async fn resolve_key_material_prefers_inline_ciphertext_over_key_path() {
        let h = host();
        let resolved = resolve_key_material(&h, "inline-key-material").await.unwrap();
        assert_eq!(resolved, "inline-key-material");
    }

    #[tokio::test]
    async fn resolve_key_material_falls_back_to_key_path_when_inline_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519");
        tokio::fs::write(&path, "pem-contents-on-disk").await.unwrap();

        let mut h = host();
        h.key_path = Some(path);
        let resolved = resolve_key_material(&h, "").await.unwrap();
        assert_eq!(resolved, "pem-contents-on-disk");
    }

    #[tokio::test]
    async fn resolve_key_material_errors_when_neither_is_set() {
        let h = host();
        let err = resolve_key_material(&h, "").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
