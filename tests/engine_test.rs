//! Engine-level integration tests that do not require a live SSH server
//! (§8 scenarios reachable without network access: validation, port
//! scanning, status/lifecycle bookkeeping, and the Clash export gate).

use ssh_tunnel_manager::config::EngineConfig;
use ssh_tunnel_manager::engine::TunnelEngine;
use ssh_tunnel_manager::error::EngineError;
use ssh_tunnel_manager::models::{Host, Tunnel, TunnelStatus};
use ssh_tunnel_manager::repository::memory::InMemoryRepository;
use ssh_tunnel_manager::repository::Repository;
use std::sync::Arc;

fn engine() -> (TunnelEngine, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new());
    let engine = TunnelEngine::new(repo.clone(), EngineConfig::default());
    (engine, repo)
}

async fn seed_host(repo: &InMemoryRepository) -> i64 {
    let host = Host::new("home", "example.com", "alice");
    repo.create_host(host).await.unwrap().id
}

#[tokio::test]
async fn create_rejects_tunnel_missing_remote_fields() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let mut tunnel = Tunnel::new_local_forward(host_id, "db", 15432, "10.0.0.5", 5432);
    tunnel.remote_address = None;

    let err = engine.create(tunnel).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn create_rejects_an_address_already_bound() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let busy_port = listener.local_addr().unwrap().port();

    let tunnel = Tunnel::new_local_forward(host_id, "busy", busy_port, "10.0.0.5", 3306);
    let err = engine.create(tunnel).await.unwrap_err();
    assert!(matches!(err, EngineError::Bind(_)));
}

/// S5-shaped: a free port in the dynamic range is found and used.
#[tokio::test]
async fn create_dynamic_tunnel_finds_a_free_port() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;

    let tunnel = engine.create_dynamic_tunnel(host_id, "socks", "", false).await.unwrap();
    assert!((1080..=1090).contains(&tunnel.local_port) || (8080..=8090).contains(&tunnel.local_port));
    assert_eq!(tunnel.status, TunnelStatus::Inactive);
}

#[tokio::test]
async fn stop_on_a_tunnel_with_no_handle_is_not_running() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let tunnel = engine.create(Tunnel::new_local_forward(host_id, "db", 15433, "10.0.0.5", 3306)).await.unwrap();

    let err = engine.stop(tunnel.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotRunning));
}

/// Invariant 4: with no registered handle, status falls back to the
/// persisted value.
#[tokio::test]
async fn status_without_a_handle_reflects_persisted_state() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let tunnel = engine.create(Tunnel::new_local_forward(host_id, "db", 15434, "10.0.0.5", 3306)).await.unwrap();

    assert_eq!(engine.status(tunnel.id).await.unwrap(), TunnelStatus::Inactive);
}

/// Process-start recovery (§3): any tunnel left `active` in storage
/// (e.g. from an unclean shutdown) is reset to `inactive`, since no
/// handle survives a restart.
#[tokio::test]
async fn recover_persisted_state_resets_stale_active_tunnels() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let tunnel = engine.create(Tunnel::new_local_forward(host_id, "db", 15435, "10.0.0.5", 3306)).await.unwrap();
    repo.update_tunnel_status(tunnel.id, TunnelStatus::Active).await.unwrap();

    engine.recover_persisted_state().await.unwrap();

    assert_eq!(repo.get_tunnel(tunnel.id).await.unwrap().status, TunnelStatus::Inactive);
}

#[tokio::test]
async fn delete_removes_the_tunnel_record() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let tunnel = engine.create(Tunnel::new_local_forward(host_id, "db", 15436, "10.0.0.5", 3306)).await.unwrap();

    engine.delete(tunnel.id).await.unwrap();

    assert!(matches!(repo.get_tunnel(tunnel.id).await, Err(EngineError::NotFound(_))));
}

/// S7-shaped: exporting with zero active dynamic tunnels is a distinct,
/// named error rather than an empty document.
#[tokio::test]
async fn export_clash_fails_with_no_active_dynamic_tunnels() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    engine.create(Tunnel::new_dynamic(host_id, "socks", 1080)).await.unwrap();

    let err = engine.export_clash().await.unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSocks5));
}

#[tokio::test]
async fn start_auto_tunnels_skips_tunnels_without_auto_start() {
    let (engine, repo) = engine();
    let host_id = seed_host(&repo).await;
    let mut tunnel = Tunnel::new_local_forward(host_id, "db", 15437, "10.0.0.5", 3306);
    tunnel.auto_start = false;
    engine.create(tunnel).await.unwrap();

    // No auto-start tunnels exist, so this must return without dialing
    // anything (and thus without erroring or hanging).
    engine.start_auto_tunnels().await;
}
