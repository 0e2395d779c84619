//! Argument parsing for the bundled demo binary.
//!
//! Grounded on the teacher's `src/cli/commands.rs` (`clap` derive shape,
//! subcommand naming style), restructured around `TunnelEngine`'s
//! operations instead of the teacher's `AppState`-backed connection
//! commands.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tunnel-demo")]
#[command(author, version, about = "Drive the SSH tunnel engine from the command line", long_about = None)]
pub struct Cli {
    /// Key the crypto box derives its AES-256 key from.
    #[arg(long, env = "TUNNEL_CRYPTO_KEY", default_value = "tunnel-demo-dev-key")]
    pub crypto_key: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a host.
    HostAdd {
        #[arg(long)]
        name: String,
        #[arg(long)]
        hostname: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        username: String,
        #[arg(long, value_enum, default_value = "password")]
        auth: AuthArg,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        private_key: String,
        #[arg(long)]
        key_path: Option<std::path::PathBuf>,
        #[arg(long, default_value = "")]
        passphrase: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List registered hosts.
    HostList,
    /// Show one host (secrets decrypted).
    HostShow { id: i64 },
    /// Delete a host; fails if any tunnel still references it.
    HostDelete { id: i64 },
    /// Dial the host and run a trivial probe command.
    HostTest { id: i64 },

    /// Create a local_forward tunnel.
    TunnelLocal {
        #[arg(long)]
        host_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        local_port: u16,
        #[arg(long)]
        remote_host: String,
        #[arg(long)]
        remote_port: u16,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        auto_start: bool,
    },
    /// Create a remote_forward tunnel.
    TunnelRemote {
        #[arg(long)]
        host_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        remote_port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        local_host: String,
        #[arg(long)]
        local_port: u16,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        auto_start: bool,
    },
    /// Create a dynamic (SOCKS5) tunnel on the first free port in
    /// 1080-1090, falling back to 8080-8090.
    TunnelDynamic {
        #[arg(long)]
        host_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        auto_start: bool,
    },
    /// List all tunnels.
    TunnelList,
    /// Start a tunnel.
    TunnelStart { id: i64 },
    /// Stop a running tunnel.
    TunnelStop { id: i64 },
    /// Stop then start a tunnel.
    TunnelRestart { id: i64 },
    /// Stop (if running) and delete a tunnel.
    TunnelDelete { id: i64 },
    /// Report a tunnel's effective status.
    TunnelStatus { id: i64 },
    /// Show a tunnel's connection log, newest first.
    TunnelLogs {
        id: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Start every tunnel flagged `auto_start`.
    StartAuto,
    /// Stop every currently-running tunnel.
    StopAll,
    /// Write a Clash proxy config covering active dynamic tunnels to stdout.
    ExportClash,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum AuthArg {
    Password,
    Key,
    KeyWithPassphrase,
}

impl From<AuthArg> for ssh_tunnel_manager::models::AuthKind {
    fn from(value: AuthArg) -> Self {
        match value {
            AuthArg::Password => ssh_tunnel_manager::models::AuthKind::Password,
            AuthArg::Key => ssh_tunnel_manager::models::AuthKind::Key,
            AuthArg::KeyWithPassphrase => ssh_tunnel_manager::models::AuthKind::KeyWithPassphrase,
        }
    }
}
