//! Storage Server network layer.
//!
//! - A client listener: one spawned task per redirected client connection.
//! - A control link: the SS dials the NM, registers its port and files, and then
//!   answers NM commands on that same connection. A dropped link is re-established
//!   in the background.
//! - A lease sweeper that periodically frees expired sentence locks.

use super::dispatcher::{ClientReply, ClientSession, StorageNode};
use super::protocol::{ClientCommand, ControlCommand, RegisterStorage, STREAM_END, error_reply};
use crate::config::StorageServerConfig;
use crate::wire::{
    Response, is_malformed_line, malformed_request, read_frame, read_line, write_frame, write_line,
};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// Pause before re-registering after the control link drops.
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

type ControlConn = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

pub struct StorageServer {
    pub node: Arc<StorageNode>,
    listener: TcpListener,
    config: StorageServerConfig,
}

impl StorageServer {
    /// Loads stored files and binds the client listener.
    pub async fn bind(config: StorageServerConfig) -> Result<Self> {
        let node = StorageNode::open(&config).await?;
        let listener = TcpListener::bind(config.client_bind).await?;

        tracing::info!("Storage server listening for clients on {}", listener.local_addr()?);

        Ok(Self {
            node,
            listener,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registers with the NM, then serves clients until the listener fails.
    pub async fn run(self) -> Result<()> {
        let client_port = self.local_addr()?.port();

        let conn = register_with_retry(
            &self.config.name_server,
            &self.node,
            client_port,
            self.config.register_attempts,
        )
        .await?;

        // 1. Control link:
        let control = ControlLink {
            node: self.node.clone(),
            name_server: self.config.name_server.clone(),
            client_port,
            attempts: self.config.register_attempts,
        };
        tokio::spawn(async move {
            control.serve(conn).await;
        });

        // 2. Lease sweeper:
        let sweeper_node = self.node.clone();
        let sweep_interval = self.config.lock_sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                let removed = sweeper_node.sweep_locks();
                if removed > 0 {
                    tracing::info!("Lease sweep released {} lock(s)", removed);
                }
            }
        });

        // 3. Client connections:
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let node = self.node.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client_connection(node, stream, peer).await {
                    tracing::debug!("Client {} connection ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_client_connection(node: Arc<StorageNode>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    tracing::debug!("Client connected: {}", peer);

    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = ClientSession::new();

    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) if is_malformed_line(&err) => {
                write_line(&mut writer, &error_reply(&malformed_request())).await?;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!("{} -> {}", peer, line);

        let reply = match ClientCommand::parse(&line) {
            Ok(command) => node.handle_client(&mut session, command).await,
            Err(err) => ClientReply::Line(error_reply(&err)),
        };

        match reply {
            ClientReply::Line(text) => write_line(&mut writer, &text).await?,
            ClientReply::Stream(words) => {
                for (i, word) in words.iter().enumerate() {
                    if i > 0 && !node.stream_delay().is_zero() {
                        tokio::time::sleep(node.stream_delay()).await;
                    }
                    write_line(&mut writer, word).await?;
                }
                write_line(&mut writer, STREAM_END).await?;
            }
            ClientReply::Close => break,
        }
    }

    tracing::debug!("Client disconnected: {}", peer);
    Ok(())
}

/// Dials the NM and performs the `REGISTER_SS` handshake.
async fn register(name_server: &str, node: &StorageNode, client_port: u16) -> Result<ControlConn> {
    let stream = TcpStream::connect(name_server).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let registration = RegisterStorage {
        client_port,
        files: node.store.list(),
    };
    for line in registration.to_lines() {
        write_line(&mut writer, &line).await?;
    }

    let response = read_frame(&mut reader)
        .await?
        .ok_or_else(|| anyhow::anyhow!("name server closed the connection during registration"))?;
    let message = response
        .into_result()
        .map_err(|e| anyhow::anyhow!("registration rejected: {}", e))?;

    tracing::info!(
        "Registered with name server {} ({} file(s)): {}",
        name_server,
        registration.files.len(),
        message
    );
    Ok((reader, writer))
}

async fn register_with_retry(
    name_server: &str,
    node: &StorageNode,
    client_port: u16,
    attempts: usize,
) -> Result<ControlConn> {
    let attempts = attempts.max(1);
    let mut delay_ms = 150u64;

    for attempt in 0..attempts {
        match register(name_server, node, client_port).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(e);
                }
                tracing::warn!(
                    "Registration attempt {}/{} failed: {}",
                    attempt + 1,
                    attempts,
                    e
                );
                // Simple jitter so restarted servers do not dial in lockstep
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}

struct ControlLink {
    node: Arc<StorageNode>,
    name_server: String,
    client_port: u16,
    attempts: usize,
}

impl ControlLink {
    /// Serves NM commands; re-registers whenever the link drops.
    async fn serve(self, mut conn: ControlConn) {
        loop {
            match self.serve_connection(&mut conn).await {
                Ok(()) => tracing::warn!("Name server closed the control link"),
                Err(e) => tracing::error!("Control link failed: {}", e),
            }

            conn = loop {
                tokio::time::sleep(RECONNECT_PAUSE).await;
                match register_with_retry(&self.name_server, &self.node, self.client_port, self.attempts).await {
                    Ok(conn) => break conn,
                    Err(e) => tracing::warn!("Re-registration failed: {}", e),
                }
            };
        }
    }

    async fn serve_connection(&self, conn: &mut ControlConn) -> Result<()> {
        let (reader, writer) = conn;

        while let Some(line) = read_line(reader).await? {
            if line.trim().is_empty() {
                continue;
            }

            let result = match ControlCommand::parse(&line) {
                Ok(command) => self.node.handle_control(command).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                tracing::debug!("Control command '{}' failed: {}", line, err);
            }

            write_frame(writer, &Response::from_result(result)).await?;
        }

        Ok(())
    }
}
