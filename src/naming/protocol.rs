//! Name Server client protocol.
//!
//! One command per line; every reply is a response frame (`<code>:<message>` closed
//! by a `.` line). The first line of a connection must be a registration.

use super::types::Permission;
use crate::error::{DfsError, DfsResult};
use crate::wire::split_command;

/// First line of a client connection: `REGISTER_CLIENT <username> <nm_port> <ss_port>`.
pub const CMD_REGISTER_CLIENT: &str = "REGISTER_CLIENT";

pub const CMD_VIEW: &str = "VIEW";
pub const CMD_CREATE: &str = "CREATE";
pub const CMD_DELETE: &str = "DELETE";
pub const CMD_INFO: &str = "INFO";
pub const CMD_LIST: &str = "LIST";
pub const CMD_ADDACCESS: &str = "ADDACCESS";
pub const CMD_REMACCESS: &str = "REMACCESS";
pub const CMD_READ: &str = "READ";
pub const CMD_WRITE: &str = "WRITE";
pub const CMD_STREAM: &str = "STREAM";
pub const CMD_EXEC: &str = "EXEC";
pub const CMD_UNDO: &str = "UNDO";
pub const CMD_QUIT: &str = "QUIT";
pub const CMD_EXIT: &str = "EXIT";

/// Parsed `REGISTER_CLIENT` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterClient {
    pub username: String,
    pub nm_port: u16,
    pub ss_port: u16,
}

impl RegisterClient {
    pub fn parse(args: &[&str]) -> DfsResult<Self> {
        let usage = || DfsError::InvalidArgs("usage: REGISTER_CLIENT <username> <nm_port> <ss_port>".to_string());

        match args {
            [username, nm_port, ss_port] => Ok(Self {
                username: username.to_string(),
                nm_port: nm_port.parse().map_err(|_| usage())?,
                ss_port: ss_port.parse().map_err(|_| usage())?,
            }),
            _ => Err(usage()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NmCommand {
    View { all: bool, long: bool },
    Create { file: String },
    Delete { file: String },
    Info { file: String },
    List,
    AddAccess { perm: Permission, file: String, user: String },
    RemAccess { file: String, user: String },
    Read { file: String },
    Write { file: String, sentence: usize },
    Stream { file: String },
    Exec { file: String },
    Undo { file: String },
    Quit,
}

impl NmCommand {
    pub fn parse(line: &str) -> DfsResult<Self> {
        let (verb, args) =
            split_command(line).ok_or_else(|| DfsError::InvalidArgs("empty command".to_string()))?;

        let file_arg = |usage: &str| -> DfsResult<String> {
            match args.as_slice() {
                [file] => Ok(file.to_string()),
                _ => Err(DfsError::InvalidArgs(format!("usage: {}", usage))),
            }
        };

        match verb.as_str() {
            CMD_VIEW => parse_view_flags(&args),
            CMD_CREATE => Ok(NmCommand::Create {
                file: file_arg("CREATE <filename>")?,
            }),
            CMD_DELETE => Ok(NmCommand::Delete {
                file: file_arg("DELETE <filename>")?,
            }),
            CMD_INFO => Ok(NmCommand::Info {
                file: file_arg("INFO <filename>")?,
            }),
            CMD_LIST => Ok(NmCommand::List),
            CMD_ADDACCESS => match args.as_slice() {
                [flag, file, user] => Ok(NmCommand::AddAccess {
                    perm: Permission::from_flag(flag)?,
                    file: file.to_string(),
                    user: user.to_string(),
                }),
                _ => Err(DfsError::InvalidArgs(
                    "usage: ADDACCESS -R|-W <filename> <username>".to_string(),
                )),
            },
            CMD_REMACCESS => match args.as_slice() {
                [file, user] => Ok(NmCommand::RemAccess {
                    file: file.to_string(),
                    user: user.to_string(),
                }),
                _ => Err(DfsError::InvalidArgs(
                    "usage: REMACCESS <filename> <username>".to_string(),
                )),
            },
            CMD_READ => Ok(NmCommand::Read {
                file: file_arg("READ <filename>")?,
            }),
            CMD_WRITE => match args.as_slice() {
                [file, sentence] => Ok(NmCommand::Write {
                    file: file.to_string(),
                    sentence: sentence.parse().map_err(|_| {
                        DfsError::InvalidArgs(format!(
                            "sentence number must be a non-negative integer, got '{}'",
                            sentence
                        ))
                    })?,
                }),
                _ => Err(DfsError::InvalidArgs(
                    "usage: WRITE <filename> <sentence#>".to_string(),
                )),
            },
            CMD_STREAM => Ok(NmCommand::Stream {
                file: file_arg("STREAM <filename>")?,
            }),
            CMD_EXEC => Ok(NmCommand::Exec {
                file: file_arg("EXEC <filename>")?,
            }),
            CMD_UNDO => Ok(NmCommand::Undo {
                file: file_arg("UNDO <filename>")?,
            }),
            CMD_QUIT | CMD_EXIT => Ok(NmCommand::Quit),
            CMD_REGISTER_CLIENT => Err(DfsError::InvalidArgs(
                "this connection is already registered".to_string(),
            )),
            other => Err(DfsError::InvalidArgs(format!("unknown command '{}'", other))),
        }
    }

    /// Operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            NmCommand::View { .. } => CMD_VIEW,
            NmCommand::Create { .. } => CMD_CREATE,
            NmCommand::Delete { .. } => CMD_DELETE,
            NmCommand::Info { .. } => CMD_INFO,
            NmCommand::List => CMD_LIST,
            NmCommand::AddAccess { .. } => CMD_ADDACCESS,
            NmCommand::RemAccess { .. } => CMD_REMACCESS,
            NmCommand::Read { .. } => CMD_READ,
            NmCommand::Write { .. } => CMD_WRITE,
            NmCommand::Stream { .. } => CMD_STREAM,
            NmCommand::Exec { .. } => CMD_EXEC,
            NmCommand::Undo { .. } => CMD_UNDO,
            NmCommand::Quit => CMD_QUIT,
        }
    }
}

/// Accepts `-a`, `-l` and combined forms such as `-al`, in any order.
fn parse_view_flags(args: &[&str]) -> DfsResult<NmCommand> {
    let mut all = false;
    let mut long = false;

    for arg in args {
        let flags = arg
            .strip_prefix('-')
            .filter(|f| !f.is_empty())
            .ok_or_else(|| DfsError::InvalidArgs(format!("unexpected VIEW argument '{}'", arg)))?;

        for flag in flags.chars() {
            match flag {
                'a' | 'A' => all = true,
                'l' | 'L' => long = true,
                other => {
                    return Err(DfsError::InvalidArgs(format!(
                        "unknown VIEW flag '-{}'",
                        other
                    )));
                }
            }
        }
    }

    Ok(NmCommand::View { all, long })
}
