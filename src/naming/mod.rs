//! Name Server (NM)
//!
//! The control plane. Owns who is connected, which files exist, who may touch
//! them, and which Storage Server holds each one. Content never flows through
//! the NM: READ, WRITE and STREAM are answered with an `SS_INFO <ip> <port>`
//! redirect and the client talks to the Storage Server directly.
//!
//! ## Submodules
//! - **`session`**: Live client sessions and the set of users ever registered.
//! - **`catalog`**: File records, ownership and access grants.
//! - **`storage_link`**: Registered Storage Servers and the control round trip to them.
//! - **`dispatcher`**: Command execution and response formatting.
//! - **`protocol`**: Client command parsing.
//! - **`server`**: TCP listener and per-connection handshake.

pub mod catalog;
pub mod dispatcher;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage_link;
pub mod types;

#[cfg(test)]
mod tests;
