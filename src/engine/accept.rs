//! Per-kind accept loops spawned by `start` (§4.1).
//!
//! Grounded on the teacher's `TunnelService::create_local_forward` /
//! `create_dynamic_forward` accept loops (`tokio::select!` racing the
//! listener against the tunnel's cancellation), generalized to the
//! `~1s` pseudo-timeout cadence this codebase's spec calls for and to
//! `Channel::into_stream()` for the SSH-tunnelled side instead of the
//! teacher's hand-rolled channel pump.

use crate::engine::dialer::SshSocks5Dialer;
use crate::models::{ConnectionLog, LogEvent, TunnelId};
use crate::repository::Repository;
use crate::socks5::TrafficCallback;
use crate::ssh::SshSession;
use crate::traffic_meter::TrafficMeter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// `local_forward`: each accepted local connection opens an SSH-tunnelled
/// direct-tcpip channel to `remote_host:remote_port` and relays.
pub async fn run_local_forward(
    listener: TcpListener,
    session: Arc<Mutex<SshSession>>,
    remote_host: String,
    remote_port: u16,
    tunnel_id: TunnelId,
    cancel: CancellationToken,
    repo: Arc<dyn Repository>,
    traffic: Arc<TrafficMeter>,
    accept_poll_interval: Duration,
) {
    tracing::info!(tunnel_id, "local_forward accept loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accept_res = tokio::time::timeout(accept_poll_interval, listener.accept()) => {
                let (stream, _peer) = match accept_res {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        tracing::warn!(tunnel_id, error = %e, "local_forward accept error");
                        continue;
                    }
                    Err(_) => continue, // deadline, reprobe cancellation
                };

                let session = session.clone();
                let remote_host = remote_host.clone();
                let cancel = cancel.clone();
                let repo = repo.clone();
                let traffic = traffic.clone();

                tokio::spawn(async move {
                    traffic.increment_connection(tunnel_id).await;
                    let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Connect, None)).await;

                    let dial_result = {
                        let guard = session.lock().await;
                        crate::ssh::open_direct_tcpip(&guard, &remote_host, remote_port).await
                    };

                    match dial_result {
                        Ok(peer) => {
                            let (bytes_in, bytes_out) = crate::relay::run(stream, peer, cancel).await;
                            traffic.log_traffic(tunnel_id, bytes_in, bytes_out).await;
                        }
                        Err(e) => {
                            let _ = repo
                                .append_log(ConnectionLog::new(
                                    tunnel_id,
                                    LogEvent::Error,
                                    Some(format!("dial {remote_host}:{remote_port} failed: {e}")),
                                ))
                                .await;
                        }
                    }

                    traffic.decrement_connection(tunnel_id).await;
                    let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Disconnect, None)).await;
                });
            }
        }
    }
    tracing::info!(tunnel_id, "local_forward accept loop stopped");
}

/// `dynamic`: each accepted local connection is handed to the SOCKS5
/// server with this tunnel's SSH session as the dialer.
pub async fn run_dynamic(
    listener: TcpListener,
    session: Arc<Mutex<SshSession>>,
    tunnel_id: TunnelId,
    cancel: CancellationToken,
    repo: Arc<dyn Repository>,
    traffic: Arc<TrafficMeter>,
    accept_poll_interval: Duration,
) {
    tracing::info!(tunnel_id, "dynamic accept loop started");
    let dialer = Arc::new(SshSocks5Dialer::new(session));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accept_res = tokio::time::timeout(accept_poll_interval, listener.accept()) => {
                let (stream, _peer) = match accept_res {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        tracing::warn!(tunnel_id, error = %e, "dynamic accept error");
                        continue;
                    }
                    Err(_) => continue,
                };

                let dialer = dialer.clone();
                let cancel = cancel.clone();
                let repo = repo.clone();
                let traffic = traffic.clone();

                tokio::spawn(async move {
                    traffic.increment_connection(tunnel_id).await;
                    let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Connect, None)).await;

                    let traffic_for_cb = traffic.clone();
                    let cb: TrafficCallback = Box::new(move |bytes_in, bytes_out| {
                        tokio::spawn(async move {
                            traffic_for_cb.log_traffic(tunnel_id, bytes_in, bytes_out).await;
                        });
                    });

                    if let Err(e) = crate::socks5::handle_connection(stream, dialer.as_ref(), Some(cb), cancel).await {
                        let _ = repo
                            .append_log(ConnectionLog::new(tunnel_id, LogEvent::Error, Some(e.to_string())))
                            .await;
                    }

                    traffic.decrement_connection(tunnel_id).await;
                    let _ = repo.append_log(ConnectionLog::new(tunnel_id, LogEvent::Disconnect, None)).await;
                });
            }
        }
    }
    tracing::info!(tunnel_id, "dynamic accept loop stopped");
}
