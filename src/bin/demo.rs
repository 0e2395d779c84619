//! Demo binary (A5): a `clap`-driven CLI wiring `InMemoryRepository` and
//! `TunnelEngine` together so the engine can be exercised end-to-end
//! without an embedding application.
//!
//! Grounded on the teacher's `src/main.rs` (logger init, `clap::Parser`
//! dispatch shape), trimmed of the GUI/interactive-mode branches and
//! `AppState` plumbing the teacher used, since this binary talks to the
//! engine directly. State is process-lifetime only: the repository is
//! in-memory, so hosts and tunnels created by one invocation are not
//! visible to the next. Useful for scripted smoke runs, not as a
//! persistent CLI tool.

mod commands;

use clap::Parser;
use commands::{Cli, Commands};
use ssh_tunnel_manager::config::EngineConfig;
use ssh_tunnel_manager::engine::TunnelEngine;
use ssh_tunnel_manager::host_service::HostService;
use ssh_tunnel_manager::models::{Host, Tunnel};
use ssh_tunnel_manager::repository::memory::InMemoryRepository;
use ssh_tunnel_manager::repository::Repository;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ssh_tunnel_manager::logging::init();

    let cli = Cli::parse();
    let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let config = EngineConfig::default().with_crypto_key(cli.crypto_key.clone());
    let crypto = Arc::new(ssh_tunnel_manager::crypto::CryptoBox::new(&cli.crypto_key));
    let hosts = HostService::new(repo.clone(), crypto, config.ssh_dial_timeout);
    let engine = TunnelEngine::new(repo.clone(), config);
    engine.recover_persisted_state().await?;

    match cli.command {
        Commands::HostAdd {
            name,
            hostname,
            port,
            username,
            auth,
            password,
            private_key,
            key_path,
            passphrase,
            description,
        } => {
            let mut host = Host::new(name, hostname, username);
            host.port = port;
            host.auth_kind = auth.into();
            host.password = password;
            host.private_key = private_key;
            host.key_path = key_path;
            host.passphrase = passphrase;
            host.description = description;
            let created = hosts.create(host).await?;
            println!("created host #{} ({})", created.id, created.name);
        }
        Commands::HostList => {
            for host in hosts.get_all().await? {
                println!(
                    "#{} {} {}@{}:{} [{:?}] status={:?}",
                    host.id, host.name, host.username, host.hostname, host.port, host.auth_kind, host.status
                );
            }
        }
        Commands::HostShow { id } => {
            let host = hosts.get(id).await?;
            println!("{host:#?}");
        }
        Commands::HostDelete { id } => {
            hosts.delete(id).await?;
            println!("deleted host #{id}");
        }
        Commands::HostTest { id } => {
            let ok = hosts.test_connection(id).await?;
            println!("host #{id} reachable: {ok}");
        }

        Commands::TunnelLocal { host_id, name, local_port, remote_host, remote_port, description, auto_start } => {
            let mut tunnel = Tunnel::new_local_forward(host_id, name, local_port, remote_host, remote_port);
            tunnel.description = description;
            tunnel.auto_start = auto_start;
            let created = engine.create(tunnel).await?;
            println!("created local_forward tunnel #{}", created.id);
        }
        Commands::TunnelRemote { host_id, name, remote_port, local_host, local_port, description, auto_start } => {
            let mut tunnel = Tunnel::new_remote_forward(host_id, name, remote_port, local_host, local_port);
            tunnel.description = description;
            tunnel.auto_start = auto_start;
            let created = engine.create(tunnel).await?;
            println!("created remote_forward tunnel #{}", created.id);
        }
        Commands::TunnelDynamic { host_id, name, description, auto_start } => {
            let created = engine.create_dynamic_tunnel(host_id, name, description, auto_start).await?;
            println!("created dynamic tunnel #{} on 127.0.0.1:{}", created.id, created.local_port);
        }
        Commands::TunnelList => {
            for tunnel in repo.list_tunnels().await? {
                println!(
                    "#{} {} [{:?}] {}:{} status={:?}",
                    tunnel.id, tunnel.name, tunnel.kind, tunnel.local_address, tunnel.local_port, tunnel.status
                );
            }
        }
        Commands::TunnelStart { id } => {
            engine.start(id).await?;
            println!("started tunnel #{id}");
        }
        Commands::TunnelStop { id } => {
            engine.stop(id).await?;
            println!("stopped tunnel #{id}");
        }
        Commands::TunnelRestart { id } => {
            engine.restart(id).await?;
            println!("restarted tunnel #{id}");
        }
        Commands::TunnelDelete { id } => {
            engine.delete(id).await?;
            println!("deleted tunnel #{id}");
        }
        Commands::TunnelStatus { id } => {
            let status = engine.status(id).await?;
            println!("tunnel #{id} status: {status:?}");
        }
        Commands::TunnelLogs { id, limit } => {
            for log in engine.logs(id, limit).await? {
                println!("{} {:?} {}", log.timestamp.to_rfc3339(), log.event, log.message.unwrap_or_default());
            }
        }

        Commands::StartAuto => {
            engine.start_auto_tunnels().await;
            println!("auto-start pass complete");
        }
        Commands::StopAll => {
            engine.stop_all().await;
            println!("stop-all pass complete");
        }
        Commands::ExportClash => {
            let yaml = engine.export_clash().await?;
            println!("{yaml}");
        }
    }

    Ok(())
}
