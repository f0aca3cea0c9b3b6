use crate::error::{DfsError, DfsResult};
use crate::storage::protocol::FileStats;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Numeric id the NM assigns to each registered Storage Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u32);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ss-{}", self.0)
    }
}

/// Permission a grant confers. WRITE implies READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    /// Parses the `-R` / `-W` flag of ADDACCESS.
    pub fn from_flag(flag: &str) -> DfsResult<Self> {
        match flag.to_ascii_uppercase().as_str() {
            "-R" => Ok(Permission::Read),
            "-W" => Ok(Permission::Write),
            other => Err(DfsError::InvalidArgs(format!(
                "access flag must be -R or -W, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "READ"),
            Permission::Write => write!(f, "WRITE"),
        }
    }
}

/// Effective access of one user on one file, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    None,
    Read,
    Write,
    Owner,
}

impl Access {
    pub fn allows(&self, needed: Permission) -> bool {
        match needed {
            Permission::Read => *self >= Access::Read,
            Permission::Write => *self >= Access::Write,
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Access::None => "none",
            Access::Read => "read",
            Access::Write => "read/write",
            Access::Owner => "owner",
        };
        write!(f, "{}", label)
    }
}

/// A live client session.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub session_id: u64,
    pub nm_port: u16,
    pub ss_port: u16,
    pub peer: SocketAddr,
    pub connected_at: u64,
}

/// Catalog entry for one file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub owner: String,
    pub storage: StorageId,
    pub created_at: u64,
    pub modified_at: u64,
    pub accessed_at: u64,
    /// Cached from the SS; refreshed on INFO and after UNDO.
    pub stats: FileStats,
    pub grants: BTreeMap<String, Permission>,
}

impl FileRecord {
    pub fn new(name: &str, owner: &str, storage: StorageId, now: u64) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            storage,
            created_at: now,
            modified_at: now,
            accessed_at: now,
            stats: FileStats::default(),
            grants: BTreeMap::new(),
        }
    }

    pub fn access_for(&self, user: &str) -> Access {
        if self.owner == user {
            return Access::Owner;
        }
        match self.grants.get(user) {
            Some(Permission::Write) => Access::Write,
            Some(Permission::Read) => Access::Read,
            None => Access::None,
        }
    }
}

/// Where a client should connect for content operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl StorageEndpoint {
    /// The `SS_INFO <ip> <port>` redirect token.
    pub fn redirect(&self) -> String {
        format!("SS_INFO {} {}", self.ip, self.port)
    }
}
