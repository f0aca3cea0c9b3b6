//! Error taxonomy shared by the Name Server and the Storage Server.
//!
//! Every domain failure is a `DfsError`. Dispatchers never let one of these
//! terminate a connection: they are rendered into a coded response line via
//! [`DfsError::code`] and the session carries on.

use thiserror::Error;

pub type DfsResult<T> = Result<T, DfsError>;

/// Wire code for a successful response.
pub const CODE_SUCCESS: u16 = 0;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DfsError {
    /// A file or user the request names does not exist.
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Sentence is HELD by a different user.
    #[error("sentence {sentence} of '{file}' is locked by another user")]
    AlreadyLocked { file: String, sentence: usize },

    #[error("sentence {sentence} of '{file}' is not locked by you")]
    NotLockHolder { file: String, sentence: usize },

    #[error("sentence {sentence} of '{file}' has no active lock")]
    NoActiveLock { file: String, sentence: usize },

    #[error("nothing to undo for '{0}'")]
    NothingToUndo(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("no storage server available: {0}")]
    NoStorageServer(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// An error a peer server reported; relayed with its original code.
    #[error("{message}")]
    Remote { code: u16, message: String },
}

impl DfsError {
    /// Stable numeric code written on the wire.
    pub fn code(&self) -> u16 {
        match self {
            DfsError::NotFound(_) => 1,
            DfsError::AlreadyExists(_) => 3,
            DfsError::AlreadyLocked { .. } => 4,
            DfsError::NoStorageServer(_) => 5,
            DfsError::InvalidArgs(_) => 7,
            DfsError::Transport(_) => 8,
            DfsError::PermissionDenied(_) => 9,
            DfsError::NotLockHolder { .. } => 11,
            DfsError::NoActiveLock { .. } => 12,
            DfsError::NothingToUndo(_) => 13,
            DfsError::Internal(_) => 99,
            DfsError::Remote { code, .. } => *code,
        }
    }

    /// True for a local or relayed not-found error.
    pub fn is_not_found(&self) -> bool {
        self.code() == 1
    }
}

impl From<std::io::Error> for DfsError {
    fn from(err: std::io::Error) -> Self {
        DfsError::Transport(err.to_string())
    }
}
