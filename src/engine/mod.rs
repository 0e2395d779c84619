//! Tunnel lifecycle engine (C3), the crate's central component.
//!
//! Grounded on the teacher's `TunnelService` (accept-loop shapes,
//! `tokio::select!` relay pattern) and `SessionManager` (the
//! `RwLock<HashMap<Uuid, _>>` registry-of-handles pattern), restructured
//! from session-scoped handles to a single `RwLock<HashMap<TunnelId,
//! ActiveTunnelHandle>>` owned directly by the engine. One SSH client
//! per handle, no pooling across tunnels.

mod accept;
mod dialer;
mod observer;

use crate::config::EngineConfig;
use crate::crypto::CryptoBox;
use crate::error::{EngineError, Result};
use crate::host_service;
use crate::models::{ConnectionLog, Host, HostId, LogEvent, Tunnel, TunnelId, TunnelKind, TunnelStatus};
use crate::repository::Repository;
use crate::ssh::{self, RemoteForwardMap, RemoteForwardTarget, SshSession};
use crate::traffic_meter::TrafficMeter;
use observer::EngineObserver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An `remote_forward`'s registered remote-side bind, kept so `stop` can
/// cancel it before closing the session.
struct RemoteBind {
    address: String,
    port: u16,
}

/// In-memory record of a running tunnel (§3, "Active-tunnel handle").
struct ActiveTunnelHandle {
    session: Arc<Mutex<SshSession>>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    remote_bind: Option<RemoteBind>,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// Batch-create result for `create_multiple_local_forwards`. Partial
/// success is expected, not an error.
#[derive(Debug, Default)]
pub struct BatchCreateResult {
    pub created: Vec<Tunnel>,
    pub errors: Vec<String>,
}

/// One entry of a `create_multiple_local_forwards` batch. Despite the
/// external name, each entry becomes a `remote_forward` record (§9).
#[derive(Debug, Clone)]
pub struct RemoteForwardSpec {
    pub name: String,
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub description: String,
    pub auto_start: bool,
}

pub struct TunnelEngine {
    repo: Arc<dyn Repository>,
    crypto: Arc<CryptoBox>,
    traffic: Arc<TrafficMeter>,
    config: EngineConfig,
    handles: Arc<RwLock<HashMap<TunnelId, ActiveTunnelHandle>>>,
}

impl TunnelEngine {
    pub fn new(repo: Arc<dyn Repository>, config: EngineConfig) -> Self {
        let crypto = Arc::new(CryptoBox::new(&config.crypto_key));
        Self {
            repo,
            crypto,
            traffic: Arc::new(TrafficMeter::new()),
            config,
            handles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn traffic_meter(&self) -> Arc<TrafficMeter> {
        self.traffic.clone()
    }

    /// Run once at process start (§3): collapse any persisted
    /// `active` tunnel to `inactive`, since no handles exist yet after a
    /// restart.
    pub async fn recover_persisted_state(&self) -> Result<()> {
        for tunnel in self.repo.list_tunnels_by_status(TunnelStatus::Active).await? {
            self.repo.update_tunnel_status(tunnel.id, TunnelStatus::Inactive).await?;
        }
        Ok(())
    }

    // ---- create / validate -------------------------------------------------

    pub async fn create(&self, tunnel: Tunnel) -> Result<Tunnel> {
        validate_tunnel(&tunnel)?;
        if !crate::port::is_port_available(&tunnel.local_address, tunnel.local_port) {
            return Err(EngineError::Bind(format!(
                "{}:{} is not currently bindable",
                tunnel.local_address, tunnel.local_port
            )));
        }
        self.repo.create_tunnel(tunnel).await
    }

    /// Best-effort batch of `remote_forward` records (§4.1, §9).
    pub async fn create_multiple_local_forwards(
        &self,
        host_id: HostId,
        specs: Vec<RemoteForwardSpec>,
    ) -> Result<BatchCreateResult> {
        if specs.is_empty() {
            return Err(EngineError::Validation("services list must not be empty".to_string()));
        }

        let mut result = BatchCreateResult::default();
        for spec in specs {
            let mut tunnel = Tunnel::new_remote_forward(
                host_id,
                spec.name.clone(),
                spec.remote_port,
                spec.local_host.clone(),
                spec.local_port,
            );
            tunnel.description = spec.description;
            tunnel.auto_start = spec.auto_start;

            match self.create(tunnel).await {
                Ok(created) => result.created.push(created),
                Err(e) => result.errors.push(format!("{}: {e}", spec.name)),
            }
        }
        Ok(result)
    }

    /// Scan 1080-1090, then 8080-8090, for a free local port and create a
    /// dynamic tunnel on it (§4.1).
    pub async fn create_dynamic_tunnel(
        &self,
        host_id: HostId,
        name: impl Into<String>,
        description: impl Into<String>,
        auto_start: bool,
    ) -> Result<Tunnel> {
        let address = self.config.default_bind_address.clone();
        let port = crate::port::find_available_port(1080, 1090, &address)
            .or_else(|| crate::port::find_available_port(8080, 8090, &address))
            .ok_or(EngineError::NoAvailablePort)?;

        let mut tunnel = Tunnel::new_dynamic(host_id, name, port);
        tunnel.description = description.into();
        tunnel.auto_start = auto_start;
        self.create(tunnel).await
    }

    /// First port in `[start, end]` on which a transient bind succeeds.
    /// `address` defaults to `127.0.0.1` ("localhost" normalized to the
    /// loopback literal the bind check requires).
    pub fn find_available_port(&self, start: u16, end: u16, address: Option<&str>) -> Result<u16> {
        let address = address.unwrap_or("127.0.0.1");
        let address = if address.eq_ignore_ascii_case("localhost") { "127.0.0.1" } else { address };
        crate::port::find_available_port(start, end, address).ok_or(EngineError::NoAvailablePort)
    }

    // ---- start / stop / restart / update / delete --------------------------

    /// Resolve the host, dial SSH, and dispatch by tunnel kind (§4.1).
    pub async fn start(&self, id: TunnelId) -> Result<()> {
        if self.handles.read().await.contains_key(&id) {
            return Err(EngineError::AlreadyRunning);
        }

        let tunnel = self.repo.get_tunnel(id).await?;
        let host = host_service::decrypt_sensitive(self.repo.get_host(tunnel.host_id).await?, &self.crypto)?;

        let cancel = CancellationToken::new();
        let remote_forwards: RemoteForwardMap = Arc::new(RwLock::new(HashMap::new()));
        let observer = Arc::new(EngineObserver::new(self.repo.clone(), self.traffic.clone()));

        let session = match ssh::dial(
            &host,
            &host.password,
            &host.private_key,
            &host.passphrase,
            remote_forwards.clone(),
            self.config.ssh_dial_timeout,
            cancel.clone(),
            Some(observer),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => return Err(self.fail_start(id, None, e).await),
        };
        let session = Arc::new(Mutex::new(session));

        let (accept_task, remote_bind) = match tunnel.kind {
            TunnelKind::LocalForward => {
                let listener = match self.bind_listener(&tunnel).await {
                    Ok(l) => l,
                    Err(e) => return Err(self.fail_start(id, Some(session), e).await),
                };
                let task = tokio::spawn(accept::run_local_forward(
                    listener,
                    session.clone(),
                    tunnel.remote_address.clone().unwrap_or_default(),
                    tunnel.remote_port.unwrap_or(0),
                    id,
                    cancel.clone(),
                    self.repo.clone(),
                    self.traffic.clone(),
                    self.config.accept_poll_interval,
                ));
                (Some(task), None)
            }
            TunnelKind::RemoteForward => {
                let remote_address = tunnel.effective_remote_address();
                let remote_port = tunnel.remote_port.unwrap_or(0);
                remote_forwards.write().await.insert(
                    remote_port,
                    RemoteForwardTarget {
                        local_host: tunnel.local_address.clone(),
                        local_port: tunnel.local_port,
                        tunnel_id: id,
                    },
                );
                let forward_res = {
                    let guard = session.lock().await;
                    ssh::tcpip_forward(&guard, &remote_address, remote_port).await
                };
                if let Err(e) = forward_res {
                    return Err(self.fail_start(id, Some(session), e).await);
                }
                (None, Some(RemoteBind { address: remote_address, port: remote_port }))
            }
            TunnelKind::Dynamic => {
                let listener = match self.bind_listener(&tunnel).await {
                    Ok(l) => l,
                    Err(e) => return Err(self.fail_start(id, Some(session), e).await),
                };
                let task = tokio::spawn(accept::run_dynamic(
                    listener,
                    session.clone(),
                    id,
                    cancel.clone(),
                    self.repo.clone(),
                    self.traffic.clone(),
                    self.config.accept_poll_interval,
                ));
                (Some(task), None)
            }
        };

        self.handles.write().await.insert(
            id,
            ActiveTunnelHandle { session, cancel, accept_task, remote_bind, started_at: chrono::Utc::now() },
        );

        self.repo.update_tunnel_status(id, TunnelStatus::Active).await?;
        self.repo.append_log(ConnectionLog::new(id, LogEvent::Start, None)).await?;
        tracing::info!(tunnel_id = id, kind = ?tunnel.kind, "tunnel started");
        Ok(())
    }

    async fn bind_listener(&self, tunnel: &Tunnel) -> Result<TcpListener> {
        let addr = format!("{}:{}", tunnel.local_address, tunnel.local_port);
        TcpListener::bind(&addr).await.map_err(|e| EngineError::Bind(format!("{addr}: {e}")))
    }

    /// Common start-failure path: best-effort session teardown, status
    /// flips to `error`, an `error` log is appended, the original error is
    /// returned unchanged.
    async fn fail_start(&self, id: TunnelId, session: Option<Arc<Mutex<SshSession>>>, err: EngineError) -> EngineError {
        if let Some(session) = session {
            let mut guard = session.lock().await;
            let _ = ssh::disconnect(&mut guard).await;
        }
        let _ = self.repo.update_tunnel_status(id, TunnelStatus::Error).await;
        let _ = self.repo.append_log(ConnectionLog::new(id, LogEvent::Error, Some(err.to_string()))).await;
        tracing::warn!(tunnel_id = id, error = %err, "tunnel start failed");
        err
    }

    /// (a) cancel, so the accept loop's `tokio::select!` observes this
    /// before its next ~1s deadline and drops the listener on exit,
    /// releasing the bind; (b) await the accept task so the drop has
    /// actually happened; (c) close the SSH client; (d) settle; (e)
    /// persist `inactive` and append a `stop` log (§4.1).
    pub async fn stop(&self, id: TunnelId) -> Result<()> {
        let handle = self.handles.write().await.remove(&id).ok_or(EngineError::NotRunning)?;

        handle.cancel.cancel();
        if let Some(task) = handle.accept_task {
            let _ = task.await;
        }

        if let Some(bind) = &handle.remote_bind {
            let guard = handle.session.lock().await;
            let _ = ssh::cancel_tcpip_forward(&guard, &bind.address, bind.port).await;
        }
        {
            let mut guard = handle.session.lock().await;
            let _ = ssh::disconnect(&mut guard).await;
        }

        tokio::time::sleep(self.config.post_stop_settle).await;

        self.repo.update_tunnel_status(id, TunnelStatus::Inactive).await?;
        self.repo.append_log(ConnectionLog::new(id, LogEvent::Stop, None)).await?;
        self.traffic.reset(id).await;
        tracing::info!(tunnel_id = id, "tunnel stopped");
        Ok(())
    }

    /// Stop (tolerant of not-running) → ~1s pause → start (§4.1).
    pub async fn restart(&self, id: TunnelId) -> Result<()> {
        match self.stop(id).await {
            Ok(()) | Err(EngineError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(self.config.restart_settle).await;
        self.start(id).await
    }

    /// Revalidate; if running, stop-persist-start, otherwise persist
    /// directly (§4.1).
    pub async fn update(&self, tunnel: Tunnel) -> Result<Tunnel> {
        validate_tunnel(&tunnel)?;
        let id = tunnel.id;
        let running = self.handles.read().await.contains_key(&id);

        if running {
            self.stop(id).await?;
            let updated = self.repo.update_tunnel(tunnel).await?;
            self.start(id).await?;
            Ok(updated)
        } else {
            self.repo.update_tunnel(tunnel).await
        }
    }

    /// Stop (best-effort), then delete the record; its logs cascade (§4.1).
    pub async fn delete(&self, id: TunnelId) -> Result<()> {
        if let Err(e) = self.stop(id).await {
            if !matches!(e, EngineError::NotRunning) {
                tracing::warn!(tunnel_id = id, error = %e, "stop-before-delete failed");
            }
        }
        self.traffic.reset(id).await;
        self.repo.delete_tunnel(id).await
    }

    // ---- batch lifecycle ----------------------------------------------------

    pub async fn start_auto_tunnels(&self) {
        let auto = match self.repo.list_auto_start_tunnels().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "could not list auto-start tunnels");
                return;
            }
        };
        for tunnel in auto {
            if let Err(e) = self.start(tunnel.id).await {
                tracing::warn!(tunnel_id = tunnel.id, error = %e, "auto-start failed");
            }
        }
    }

    pub async fn stop_all(&self) {
        let ids: Vec<TunnelId> = self.handles.read().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.stop(id).await {
                tracing::warn!(tunnel_id = id, error = %e, "stop-all: tunnel failed to stop");
            }
        }
    }

    // ---- status / logs / health / export ------------------------------------

    /// If a handle is registered, `active`; otherwise the persisted status
    /// (§4.1, invariant 4).
    pub async fn status(&self, id: TunnelId) -> Result<TunnelStatus> {
        if self.handles.read().await.contains_key(&id) {
            return Ok(TunnelStatus::Active);
        }
        Ok(self.repo.get_tunnel(id).await?.status)
    }

    /// Newest-first; `limit` of zero or negative means unlimited.
    pub async fn logs(&self, id: TunnelId, limit: i64) -> Result<Vec<ConnectionLog>> {
        self.repo.list_logs_by_tunnel(id, limit).await
    }

    /// TCP dial with a 5s timeout; success is "healthy" (§4.1).
    pub async fn check_service_health(&self, address: &str, port: u16) -> bool {
        tokio::time::timeout(self.config.health_check_timeout, tokio::net::TcpStream::connect((address, port)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// The set of currently-active dynamic tunnels, synthesised into a
    /// Clash proxy config (§4.5).
    pub async fn export_clash(&self) -> Result<String> {
        let tunnels = self.repo.list_tunnels().await?;
        let active_dynamic: Vec<Tunnel> = tunnels
            .into_iter()
            .filter(|t| t.kind == TunnelKind::Dynamic && t.status == TunnelStatus::Active)
            .collect();

        let mut hosts: HashMap<HostId, Host> = HashMap::new();
        for tunnel in &active_dynamic {
            if let std::collections::hash_map::Entry::Vacant(e) = hosts.entry(tunnel.host_id) {
                e.insert(self.repo.get_host(tunnel.host_id).await?);
            }
        }

        crate::clash::export(&active_dynamic, &hosts)
    }
}

fn validate_tunnel(tunnel: &Tunnel) -> Result<()> {
    if tunnel.name.trim().is_empty() {
        return Err(EngineError::Validation("tunnel name must not be empty".to_string()));
    }
    if tunnel.local_port == 0 {
        return Err(EngineError::Validation("local_port must be in 1-65535".to_string()));
    }
    if !tunnel.has_required_fields() {
        return Err(EngineError::Validation(format!(
            "tunnel kind {:?} is missing required remote fields",
            tunnel.kind
        )));
    }
    Ok(())
}
