//! Links from the NM to registered Storage Servers.
//!
//! Each SS keeps the TCP connection it registered on open; the NM sends control
//! commands over it one at a time (the per-link `tokio::sync::Mutex` serialises
//! round trips). A forward that fails or times out drops the connection and marks
//! the link inactive until the SS registers again.

use super::types::{StorageEndpoint, StorageId};
use crate::error::{DfsError, DfsResult};
use crate::storage::protocol::ControlCommand;
use crate::wire::{read_frame, write_line};

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

pub type ControlConn = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

pub struct StorageLink {
    pub id: StorageId,
    pub ip: IpAddr,
    pub client_port: u16,
    active: AtomicBool,
    conn: Mutex<Option<ControlConn>>,
}

impl StorageLink {
    pub fn endpoint(&self) -> StorageEndpoint {
        StorageEndpoint {
            ip: self.ip,
            port: self.client_port,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn attach(&self, conn: ControlConn) {
        *self.conn.lock().await = Some(conn);
        self.active.store(true, Ordering::Release);
    }

    /// Sends one control command and waits for its response frame.
    pub async fn forward(&self, command: &ControlCommand, timeout: Duration) -> DfsResult<String> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(DfsError::NoStorageServer(format!("{} is not connected", self.id)));
        };

        let round_trip = async {
            let (reader, writer) = conn;
            write_line(writer, &command.to_line()).await?;
            read_frame(reader).await
        };

        let failure = match tokio::time::timeout(timeout, round_trip).await {
            Ok(Ok(Some(response))) => return response.into_result(),
            Ok(Ok(None)) => "connection closed".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {:?}", timeout),
        };

        *guard = None;
        self.active.store(false, Ordering::Release);
        tracing::warn!(
            "Storage server {} ({}:{}) dropped: {}",
            self.id,
            self.ip,
            self.client_port,
            failure
        );
        Err(DfsError::Transport(format!("{}: {}", self.id, failure)))
    }
}

#[derive(Default)]
pub struct StorageRegistry {
    links: DashMap<StorageId, Arc<StorageLink>>,
    next_id: AtomicU32,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an SS, reusing the id of an earlier registration from the same address.
    pub async fn register(&self, ip: IpAddr, client_port: u16, conn: ControlConn) -> Arc<StorageLink> {
        let existing = self
            .links
            .iter()
            .find(|entry| entry.value().ip == ip && entry.value().client_port == client_port)
            .map(|entry| entry.value().clone());

        let link = match existing {
            Some(link) => {
                tracing::info!("Storage server {} re-registered from {}:{}", link.id, ip, client_port);
                link
            }
            None => {
                let id = StorageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                let link = Arc::new(StorageLink {
                    id,
                    ip,
                    client_port,
                    active: AtomicBool::new(false),
                    conn: Mutex::new(None),
                });
                self.links.insert(id, link.clone());
                tracing::info!("Storage server {} registered from {}:{}", id, ip, client_port);
                link
            }
        };

        link.attach(conn).await;
        link
    }

    pub fn get(&self, id: StorageId) -> Option<Arc<StorageLink>> {
        self.links.get(&id).map(|entry| entry.value().clone())
    }

    /// The link serving `id`, if it is currently usable.
    pub fn active(&self, id: StorageId) -> DfsResult<Arc<StorageLink>> {
        match self.get(id) {
            Some(link) if link.is_active() => Ok(link),
            Some(_) => Err(DfsError::NoStorageServer(format!("{} is unavailable", id))),
            None => Err(DfsError::NoStorageServer(format!("{} is not registered", id))),
        }
    }

    pub fn active_links(&self) -> Vec<Arc<StorageLink>> {
        let mut links: Vec<Arc<StorageLink>> = self
            .links
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect();
        links.sort_by_key(|link| link.id);
        links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
