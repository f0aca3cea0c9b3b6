//! Name Server network layer.
//!
//! Every accepted connection is a spawned task. Its first line decides the role:
//! `REGISTER_CLIENT` starts a client session, `REGISTER_SS` hands the socket to
//! the Storage Registry as a control link. Anything else is refused.

use super::dispatcher::NamingService;
use super::protocol::{CMD_REGISTER_CLIENT, RegisterClient};
use crate::config::NameServerConfig;
use crate::error::DfsError;
use crate::storage::protocol::{CMD_REGISTER_SS, RegisterStorage};
use crate::wire::{
    Response, is_malformed_line, malformed_request, read_line, split_command, write_frame,
};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub struct NameServer {
    pub service: Arc<NamingService>,
    listener: TcpListener,
}

impl NameServer {
    pub async fn bind(config: NameServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        tracing::info!(
            "Name server listening on {} (VIEW -a policy: {:?})",
            listener.local_addr()?,
            config.view_all_policy
        );

        Ok(Self {
            service: NamingService::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(service, stream, peer).await {
                    tracing::debug!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(service: Arc<NamingService>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let first = match read_line(&mut reader).await {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(()),
        Err(err) if is_malformed_line(&err) => {
            write_frame(&mut writer, &Response::from_error(&malformed_request())).await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    let Some((verb, args)) = split_command(&first) else {
        return refuse(&mut writer, "expected REGISTER_CLIENT or REGISTER_SS").await;
    };

    match verb.as_str() {
        CMD_REGISTER_CLIENT => match RegisterClient::parse(&args) {
            Ok(registration) => client_session(service, reader, writer, peer, registration).await,
            Err(err) => {
                write_frame(&mut writer, &Response::from_error(&err)).await?;
                Ok(())
            }
        },
        CMD_REGISTER_SS => {
            let header = RegisterStorage::parse_header(&args);
            storage_registration(service, reader, writer, peer, header).await
        }
        _ => refuse(&mut writer, "expected REGISTER_CLIENT or REGISTER_SS").await,
    }
}

async fn refuse(writer: &mut OwnedWriteHalf, reason: &str) -> Result<()> {
    let err = DfsError::InvalidArgs(reason.to_string());
    write_frame(writer, &Response::from_error(&err)).await?;
    Ok(())
}

async fn client_session(
    service: Arc<NamingService>,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    registration: RegisterClient,
) -> Result<()> {
    // Dropping the handle deregisters the user on every exit path.
    let handle = match service.sessions.register(
        &registration.username,
        registration.nm_port,
        registration.ss_port,
        peer,
    ) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!("Rejected registration of {} from {}: {}", registration.username, peer, err);
            write_frame(&mut writer, &Response::from_error(&err)).await?;
            return Ok(());
        }
    };

    write_frame(
        &mut writer,
        &Response::ok(format!("Registered as '{}'", handle.username())),
    )
    .await?;

    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) if is_malformed_line(&err) => {
                tracing::debug!("{} sent a line that is not UTF-8", handle.username());
                write_frame(&mut writer, &Response::from_error(&malformed_request())).await?;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!("{} -> {}", handle.username(), line);

        let outcome = service.handle_line(handle.username(), &line).await;
        write_frame(&mut writer, &outcome.response).await?;
        if outcome.close {
            break;
        }
    }

    Ok(())
}

async fn storage_registration(
    service: Arc<NamingService>,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    header: Result<(u16, usize), DfsError>,
) -> Result<()> {
    let (client_port, file_count) = match header {
        Ok(header) => header,
        Err(err) => {
            write_frame(&mut writer, &Response::from_error(&err)).await?;
            return Ok(());
        }
    };

    let mut files = Vec::with_capacity(file_count.min(4096));
    for _ in 0..file_count {
        let line = read_line(&mut reader)
            .await?
            .ok_or_else(|| anyhow::anyhow!("storage server {} closed during registration", peer))?;
        match RegisterStorage::parse_file_line(&line) {
            Ok(file) => files.push(file),
            Err(err) => tracing::warn!("Ignoring file line from {}: {}", peer, err),
        }
    }

    // Acknowledge before the socket becomes the control link.
    write_frame(
        &mut writer,
        &Response::ok(format!("Registered storage server with {} file(s)", files.len())),
    )
    .await?;

    service
        .register_storage(peer.ip(), client_port, files, (reader, writer))
        .await;
    Ok(())
}
