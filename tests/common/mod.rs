//! Shared harness for the end-to-end tests: a real Name Server and Storage Server
//! on loopback ports, plus thin line-protocol clients for both.

#![allow(dead_code)]

use distributed_docs::config::{NameServerConfig, StorageServerConfig};
use distributed_docs::naming::dispatcher::NamingService;
use distributed_docs::naming::server::NameServer;
use distributed_docs::storage::dispatcher::StorageNode;
use distributed_docs::storage::server::StorageServer;
use distributed_docs::wire::{Response, read_frame, read_line, write_line};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub struct Cluster {
    pub nm_addr: SocketAddr,
    pub service: Arc<NamingService>,
    pub node: Arc<StorageNode>,
    _storage_dir: TempDir,
}

/// Starts one NM and one SS and waits until the SS has registered.
pub async fn start_cluster() -> Cluster {
    start_cluster_with(
        NameServerConfig::default(),
        StorageServerConfig {
            stream_delay_ms: 0,
            ..StorageServerConfig::default()
        },
    )
    .await
}

/// Like [`start_cluster`] with custom settings. Addresses and the storage
/// directory are always replaced with loopback ports and a temp dir.
pub async fn start_cluster_with(nm: NameServerConfig, ss: StorageServerConfig) -> Cluster {
    let name_server = NameServer::bind(NameServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ..nm
    })
    .await
    .unwrap();
    let nm_addr = name_server.local_addr().unwrap();
    let service = name_server.service.clone();
    tokio::spawn(name_server.run());

    let storage_dir = tempfile::tempdir().unwrap();
    let storage_server = StorageServer::bind(StorageServerConfig {
        name_server: nm_addr.to_string(),
        client_bind: "127.0.0.1:0".parse().unwrap(),
        storage_dir: storage_dir.path().to_path_buf(),
        ..ss
    })
    .await
    .unwrap();
    let node = storage_server.node.clone();
    tokio::spawn(storage_server.run());

    // The NM acknowledges before the link is stored, so poll for it
    for _ in 0..100 {
        if !service.storages.active_links().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(service.storages.active_links().len(), 1, "storage server never registered");

    Cluster {
        nm_addr,
        service,
        node,
        _storage_dir: storage_dir,
    }
}

/// A client connection to the Name Server.
pub struct NmClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl NmClient {
    /// Connects and sends `REGISTER_CLIENT`; returns the registration response too.
    pub async fn connect(addr: SocketAddr, username: &str) -> (Self, Response) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        let response = client
            .send(&format!("REGISTER_CLIENT {} 0 0", username))
            .await;
        (client, response)
    }

    /// Connects and registers, failing the test if registration is refused.
    pub async fn login(addr: SocketAddr, username: &str) -> Self {
        let (client, response) = Self::connect(addr, username).await;
        assert!(response.is_success(), "registration failed: {:?}", response);
        client
    }

    pub async fn send(&mut self, line: &str) -> Response {
        write_line(&mut self.writer, line).await.unwrap();
        read_frame(&mut self.reader)
            .await
            .unwrap()
            .expect("name server closed the connection")
    }

    /// Sends raw bytes as one line, for requests that are not valid text.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Response {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        read_frame(&mut self.reader)
            .await
            .unwrap()
            .expect("name server closed the connection")
    }

    /// Sends a routed command and resolves its `SS_INFO <ip> <port>` redirect.
    pub async fn redirect(&mut self, line: &str) -> SocketAddr {
        let response = self.send(line).await;
        assert!(response.is_success(), "{} failed: {:?}", line, response);

        let parts: Vec<&str> = response.message.split_whitespace().collect();
        assert_eq!(parts.len(), 3, "unexpected redirect: {}", response.message);
        assert_eq!(parts[0], "SS_INFO");
        format!("{}:{}", parts[1], parts[2]).parse().unwrap()
    }

    /// True once the server has closed this connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(read_frame(&mut self.reader).await, Ok(None) | Err(_))
    }
}

/// A client connection to a Storage Server.
pub struct SsClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) -> String {
        write_line(&mut self.writer, line).await.unwrap();
        read_line(&mut self.reader)
            .await
            .unwrap()
            .expect("storage server closed the connection")
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> String {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        read_line(&mut self.reader)
            .await
            .unwrap()
            .expect("storage server closed the connection")
    }

    /// Sends `STREAM` and collects words up to, not including, `STOP`.
    pub async fn stream(&mut self, file: &str) -> Vec<String> {
        write_line(&mut self.writer, &format!("STREAM {}", file))
            .await
            .unwrap();

        let mut words = Vec::new();
        loop {
            let line = read_line(&mut self.reader)
                .await
                .unwrap()
                .expect("storage server closed mid-stream");
            if line == "STOP" {
                return words;
            }
            words.push(line);
        }
    }

    /// Locks `sentence`, applies the updates and commits, asserting every step.
    pub async fn write_sentence(&mut self, file: &str, sentence: usize, user: &str, updates: &[&str]) {
        assert_eq!(self.send(&format!("WRITE {} {} {}", file, sentence, user)).await, "LOCKED");
        for update in updates {
            assert_eq!(self.send(update).await, "SUCCESS", "update '{}' failed", update);
        }
        assert_eq!(self.send("ETIRW").await, "SUCCESS");
    }
}
