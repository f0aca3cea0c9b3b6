//! Sentence-Locked Document Store Library
//!
//! This library crate defines the two server roles of the system and the pieces
//! they share. The binary (`main.rs`) starts one role per process.
//!
//! ## Architecture Modules
//! - **`naming`**: The Name Server (control plane). Owns client sessions, the file
//!   catalog with its access-control lists, and the links to registered storage
//!   servers. Content requests are answered with an `SS_INFO <ip> <port>` redirect.
//! - **`storage`**: The Storage Server (data plane). Keeps each file as a sparse map
//!   of sentences, enforces one writer per (file, sentence) through leased locks,
//!   persists content to disk and runs sandboxed EXEC requests.
//! - **`wire`**: Line framing and coded response frames used by both protocols.
//! - **`config`**: Serde configuration structs for both roles.
//! - **`error`**: The `DfsError` taxonomy and its wire codes.

pub mod config;
pub mod error;
pub mod naming;
pub mod storage;
pub mod wire;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Formats a millisecond timestamp for human-readable listings.
pub fn format_ms(ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
