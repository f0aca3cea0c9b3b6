use clap::{Parser, Subcommand};
use distributed_docs::config::{self, NameServerConfig, StorageServerConfig, ViewAllPolicy};
use distributed_docs::naming::server::NameServer;
use distributed_docs::storage::server::StorageServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Name server and storage server of the sentence-locked document store.
#[derive(Parser)]
#[command(name = "distributed_docs", version, about)]
struct Cli {
    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the name server.
    NameServer {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// bypass_acl or ownership_only
        #[arg(long)]
        view_all_policy: Option<ViewAllPolicy>,
        #[arg(long)]
        forward_timeout_ms: Option<u64>,
        /// Must exceed the storage servers' EXEC timeout.
        #[arg(long)]
        exec_forward_timeout_ms: Option<u64>,
    },
    /// Run a storage server and register it with the name server.
    StorageServer {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Name server address (host:port).
        #[arg(long)]
        name_server: Option<String>,
        /// Address clients connect to for READ, WRITE and STREAM.
        #[arg(long)]
        client_bind: Option<SocketAddr>,
        #[arg(long)]
        storage_dir: Option<PathBuf>,
        #[arg(long)]
        lock_lease_secs: Option<u64>,
        #[arg(long)]
        exec_timeout_ms: Option<u64>,
        #[arg(long)]
        stream_delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match cli.role {
        Role::NameServer {
            config,
            bind,
            view_all_policy,
            forward_timeout_ms,
            exec_forward_timeout_ms,
        } => {
            let mut cfg: NameServerConfig = config::load(config.as_deref())?;
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            if let Some(policy) = view_all_policy {
                cfg.view_all_policy = policy;
            }
            if let Some(ms) = forward_timeout_ms {
                cfg.forward_timeout_ms = ms;
            }
            if let Some(ms) = exec_forward_timeout_ms {
                cfg.exec_forward_timeout_ms = ms;
            }

            let server = NameServer::bind(cfg).await?;

            let stats = server.service.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                loop {
                    interval.tick().await;
                    tracing::info!(
                        "Name server stats: {} online user(s), {} file(s), {} active storage server(s)",
                        stats.sessions.live_count(),
                        stats.catalog.len(),
                        stats.storages.active_links().len()
                    );
                }
            });

            tracing::info!("Press Ctrl+C to shutdown");
            server.run().await
        }
        Role::StorageServer {
            config,
            name_server,
            client_bind,
            storage_dir,
            lock_lease_secs,
            exec_timeout_ms,
            stream_delay_ms,
        } => {
            let mut cfg: StorageServerConfig = config::load(config.as_deref())?;
            if let Some(addr) = name_server {
                cfg.name_server = addr;
            }
            if let Some(addr) = client_bind {
                cfg.client_bind = addr;
            }
            if let Some(dir) = storage_dir {
                cfg.storage_dir = dir;
            }
            if let Some(secs) = lock_lease_secs {
                cfg.lock_lease_secs = secs;
            }
            if let Some(ms) = exec_timeout_ms {
                cfg.exec_timeout_ms = ms;
            }
            if let Some(ms) = stream_delay_ms {
                cfg.stream_delay_ms = ms;
            }

            let server = StorageServer::bind(cfg).await?;
            tracing::info!("Press Ctrl+C to shutdown");
            server.run().await
        }
    }
}
