//! Session Registry
//!
//! Tracks which usernames are currently connected. Registration is
//! first-come-first-served: a second `REGISTER_CLIENT` for a live username fails
//! instead of replacing the existing session.
//!
//! A [`SessionHandle`] deregisters its session when dropped, so cleanup runs
//! exactly once whether the client sent QUIT or the socket died.

use super::types::Session;
use crate::error::{DfsError, DfsResult};
use crate::now_ms;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SessionRegistry {
    live: DashMap<String, Session>,
    /// Every username that has ever registered, with its first registration time.
    known: DashMap<String, u64>,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(
        self: &Arc<Self>,
        username: &str,
        nm_port: u16,
        ss_port: u16,
        peer: SocketAddr,
    ) -> DfsResult<SessionHandle> {
        if username.is_empty() || username.chars().any(char::is_whitespace) {
            return Err(DfsError::InvalidArgs(format!("invalid username '{}'", username)));
        }

        match self.live.entry(username.to_string()) {
            Entry::Occupied(_) => Err(DfsError::AlreadyExists(format!("user '{}'", username))),
            Entry::Vacant(vacant) => {
                let now = now_ms();
                let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Session {
                    username: username.to_string(),
                    session_id,
                    nm_port,
                    ss_port,
                    peer,
                    connected_at: now,
                });
                self.known.entry(username.to_string()).or_insert(now);

                tracing::info!("User {} registered from {}", username, peer);
                Ok(SessionHandle {
                    registry: self.clone(),
                    username: username.to_string(),
                    session_id,
                })
            }
        }
    }

    pub fn lookup(&self, username: &str) -> Option<Session> {
        self.live.get(username).map(|entry| entry.value().clone())
    }

    /// Removes the session only if it is still the one identified by `session_id`.
    pub fn deregister(&self, username: &str, session_id: u64) -> bool {
        let removed = self
            .live
            .remove_if(username, |_, session| session.session_id == session_id)
            .is_some();
        if removed {
            tracing::info!("User {} disconnected", username);
        }
        removed
    }

    pub fn is_live(&self, username: &str) -> bool {
        self.live.contains_key(username)
    }

    pub fn is_known(&self, username: &str) -> bool {
        self.known.contains_key(username)
    }

    /// Every known user, sorted, flagged with whether they are connected now.
    pub fn users(&self) -> Vec<(String, bool)> {
        let mut users: Vec<(String, bool)> = self
            .known
            .iter()
            .map(|entry| (entry.key().clone(), self.live.contains_key(entry.key())))
            .collect();
        users.sort();
        users
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Keeps a session registered for as long as it is alive.
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    username: String,
    session_id: u64,
}

impl SessionHandle {
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry.deregister(&self.username, self.session_id);
    }
}
