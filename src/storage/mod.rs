//! Storage Server (SS)
//!
//! The data plane. Holds file content as sparse sentence maps and enforces
//! sentence-level write locking.
//!
//! ## Core Concepts
//! - **Sentences**: A file is `index -> Sentence`; indices are client-chosen and need not be contiguous.
//! - **Write sessions**: `WRITE` acquires a leased lock on one sentence, word updates build a private draft,
//!   and `ETIRW` publishes the draft atomically.
//! - **Undo**: Each commit keeps the previous full sentence map for a single-level undo.
//! - **Control link**: The SS registers with the Name Server and then serves its commands on the same socket.
//!
//! ## Submodules
//! - **`sentence_store`**: Committed content, snapshots and statistics.
//! - **`locks`**: The lock table with leases and buffered drafts.
//! - **`exec`**: Sandboxed execution of a file's sentences.
//! - **`persistence`**: Content and metadata files on disk.
//! - **`dispatcher`**: Per-connection state machine and control command handling.
//! - **`server`**: TCP listener, NM registration and background sweeper.

pub mod dispatcher;
pub mod exec;
pub mod locks;
pub mod persistence;
pub mod protocol;
pub mod sentence_store;
pub mod server;
pub mod types;
