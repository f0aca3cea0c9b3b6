//! Storage Network Protocol
//!
//! Defines the command verbs and Data Transfer Objects exchanged with a Storage Server.
//!
//! Two channels exist:
//! - **Client channel**: clients redirected by the NM send READ / WRITE / STREAM and
//!   receive single-line replies (`LOCKED`, `SUCCESS`, `ERROR:<code>:<message>`, ...).
//! - **Control channel**: the long-lived NM connection opened by `REGISTER_SS`. The NM
//!   sends one [`ControlCommand`] per line and the SS answers with a response frame.

use crate::error::{DfsError, DfsResult};
use crate::wire::{rest_after, split_command};

// --- Registration ---

/// First line an SS sends to the NM: `REGISTER_SS <client_port> <file_count>`.
pub const CMD_REGISTER_SS: &str = "REGISTER_SS";

// --- Client channel ---

pub const CMD_READ: &str = "READ";
pub const CMD_WRITE: &str = "WRITE";
pub const CMD_ETIRW: &str = "ETIRW";
pub const CMD_ABORT: &str = "ABORT";
pub const CMD_STREAM: &str = "STREAM";
pub const CMD_QUIT: &str = "QUIT";

/// Reply to a successful WRITE (lock acquired or already held).
pub const REPLY_LOCKED: &str = "LOCKED";
/// Reply to a successful ETIRW or word update.
pub const REPLY_SUCCESS: &str = "SUCCESS";
pub const REPLY_ABORTED: &str = "ABORTED";
/// Last line of a STREAM response.
pub const STREAM_END: &str = "STOP";

// --- Control channel ---

pub const CTRL_CREATE: &str = "CREATE";
pub const CTRL_DELETE: &str = "DELETE";
pub const CTRL_INFO: &str = "INFO";
pub const CTRL_UNDO: &str = "UNDO";
pub const CTRL_EXEC: &str = "EXEC";

/// Renders a domain error as a client-channel reply line.
pub fn error_reply(err: &DfsError) -> String {
    format!("ERROR:{}:{}", err.code(), err)
}

/// Parses an `ERROR:<code>:<message>` reply back into its code and message.
pub fn parse_error_reply(line: &str) -> Option<(u16, &str)> {
    let rest = line.strip_prefix("ERROR:")?;
    let (code, message) = rest.split_once(':')?;
    Some((code.parse().ok()?, message))
}

fn parse_sentence_index(raw: &str) -> DfsResult<usize> {
    raw.parse()
        .map_err(|_| DfsError::InvalidArgs(format!("sentence number must be a non-negative integer, got '{}'", raw)))
}

/// Commands a redirected client may send to the SS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Read {
        file: String,
    },
    /// Opens a write session; `user` names the lock holder when given.
    Write {
        file: String,
        sentence: usize,
        user: Option<String>,
    },
    /// `<word_index> <content>` inside a write session.
    Update {
        index: usize,
        content: String,
    },
    Etirw,
    Abort,
    Stream {
        file: String,
    },
    Quit,
}

impl ClientCommand {
    pub fn parse(line: &str) -> DfsResult<Self> {
        let (verb, args) =
            split_command(line).ok_or_else(|| DfsError::InvalidArgs("empty command".to_string()))?;

        // A leading number is a word update.
        if let Ok(index) = verb.parse::<usize>() {
            let content = rest_after(line, 1).to_string();
            if content.trim().is_empty() {
                return Err(DfsError::InvalidArgs(
                    "usage: <word_index> <content>".to_string(),
                ));
            }
            return Ok(ClientCommand::Update { index, content });
        }

        match (verb.as_str(), args.as_slice()) {
            (CMD_READ, [file]) => Ok(ClientCommand::Read {
                file: file.to_string(),
            }),
            (CMD_WRITE, [file, sentence]) => Ok(ClientCommand::Write {
                file: file.to_string(),
                sentence: parse_sentence_index(sentence)?,
                user: None,
            }),
            (CMD_WRITE, [file, sentence, user]) => Ok(ClientCommand::Write {
                file: file.to_string(),
                sentence: parse_sentence_index(sentence)?,
                user: Some(user.to_string()),
            }),
            (CMD_ETIRW, []) => Ok(ClientCommand::Etirw),
            (CMD_ABORT, []) => Ok(ClientCommand::Abort),
            (CMD_STREAM, [file]) => Ok(ClientCommand::Stream {
                file: file.to_string(),
            }),
            (CMD_QUIT, _) | ("EXIT", _) => Ok(ClientCommand::Quit),
            (CMD_READ, _) => Err(DfsError::InvalidArgs("usage: READ <filename>".to_string())),
            (CMD_WRITE, _) => Err(DfsError::InvalidArgs(
                "usage: WRITE <filename> <sentence#> [<username>]".to_string(),
            )),
            (CMD_STREAM, _) => Err(DfsError::InvalidArgs("usage: STREAM <filename>".to_string())),
            _ => Err(DfsError::InvalidArgs(format!("unknown command '{}'", verb))),
        }
    }
}

/// Commands the NM sends over the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Create { file: String, owner: String },
    Delete { file: String },
    Info { file: String },
    Undo { file: String },
    Exec { file: String },
}

impl ControlCommand {
    pub fn to_line(&self) -> String {
        match self {
            ControlCommand::Create { file, owner } => format!("{} {} {}", CTRL_CREATE, file, owner),
            ControlCommand::Delete { file } => format!("{} {}", CTRL_DELETE, file),
            ControlCommand::Info { file } => format!("{} {}", CTRL_INFO, file),
            ControlCommand::Undo { file } => format!("{} {}", CTRL_UNDO, file),
            ControlCommand::Exec { file } => format!("{} {}", CTRL_EXEC, file),
        }
    }

    pub fn parse(line: &str) -> DfsResult<Self> {
        let (verb, args) =
            split_command(line).ok_or_else(|| DfsError::InvalidArgs("empty command".to_string()))?;

        match (verb.as_str(), args.as_slice()) {
            (CTRL_CREATE, [file, owner]) => Ok(ControlCommand::Create {
                file: file.to_string(),
                owner: owner.to_string(),
            }),
            (CTRL_DELETE, [file]) => Ok(ControlCommand::Delete {
                file: file.to_string(),
            }),
            (CTRL_INFO, [file]) => Ok(ControlCommand::Info {
                file: file.to_string(),
            }),
            (CTRL_UNDO, [file]) => Ok(ControlCommand::Undo {
                file: file.to_string(),
            }),
            (CTRL_EXEC, [file]) => Ok(ControlCommand::Exec {
                file: file.to_string(),
            }),
            _ => Err(DfsError::InvalidArgs(format!(
                "malformed control command '{}'",
                line.trim()
            ))),
        }
    }
}

/// Content statistics the SS reports for `INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub size_bytes: usize,
    pub words: usize,
    pub chars: usize,
    pub sentences: usize,
    pub version: u64,
    pub has_undo: bool,
    pub modified_at: u64,
    pub accessed_at: u64,
}

impl FileStats {
    pub fn to_wire(&self) -> String {
        format!(
            "SIZE:{} WORDS:{} CHARS:{} SENTENCES:{} VERSION:{} UNDO:{} MODIFIED:{} ACCESSED:{}",
            self.size_bytes,
            self.words,
            self.chars,
            self.sentences,
            self.version,
            u8::from(self.has_undo),
            self.modified_at,
            self.accessed_at,
        )
    }

    pub fn parse(raw: &str) -> DfsResult<Self> {
        let mut stats = FileStats::default();

        for field in raw.split_whitespace() {
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| DfsError::Internal(format!("malformed stats field '{}'", field)))?;
            let value: u64 = value
                .parse()
                .map_err(|_| DfsError::Internal(format!("malformed stats value '{}'", field)))?;

            match key {
                "SIZE" => stats.size_bytes = value as usize,
                "WORDS" => stats.words = value as usize,
                "CHARS" => stats.chars = value as usize,
                "SENTENCES" => stats.sentences = value as usize,
                "VERSION" => stats.version = value,
                "UNDO" => stats.has_undo = value != 0,
                "MODIFIED" => stats.modified_at = value,
                "ACCESSED" => stats.accessed_at = value,
                // Unknown keys from newer servers are ignored.
                _ => {}
            }
        }

        Ok(stats)
    }
}

/// Registration handshake sent by an SS when it connects to the NM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterStorage {
    pub client_port: u16,
    /// `(owner, filename)` for every file the SS already holds.
    pub files: Vec<(String, String)>,
}

impl RegisterStorage {
    /// Header line plus one `<owner> <filename>` line per file.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.files.len() + 1);
        lines.push(format!(
            "{} {} {}",
            CMD_REGISTER_SS,
            self.client_port,
            self.files.len()
        ));
        for (owner, file) in &self.files {
            lines.push(format!("{} {}", owner, file));
        }
        lines
    }

    /// Parses the header arguments (after the verb) into `(client_port, file_count)`.
    pub fn parse_header(args: &[&str]) -> DfsResult<(u16, usize)> {
        match args {
            [port, count] => {
                let port = port
                    .parse()
                    .map_err(|_| DfsError::InvalidArgs(format!("invalid client port '{}'", port)))?;
                let count = count
                    .parse()
                    .map_err(|_| DfsError::InvalidArgs(format!("invalid file count '{}'", count)))?;
                Ok((port, count))
            }
            _ => Err(DfsError::InvalidArgs(
                "usage: REGISTER_SS <client_port> <file_count>".to_string(),
            )),
        }
    }

    pub fn parse_file_line(line: &str) -> DfsResult<(String, String)> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(file), None) => Ok((owner.to_string(), file.to_string())),
            _ => Err(DfsError::InvalidArgs(format!(
                "malformed file registration line '{}'",
                line
            ))),
        }
    }
}
