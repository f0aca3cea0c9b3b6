//! SS Dispatcher
//!
//! Turns parsed commands into store and lock-manager calls. Domain errors never
//! escape: the client channel renders them as `ERROR:<code>:<message>` and the
//! control channel as a coded response frame.
//!
//! Each client connection carries a [`ClientSession`]: IDLE, or WRITING one
//! (file, sentence) under a held lock. READ and STREAM are only accepted while
//! IDLE; word updates, ETIRW and ABORT only while WRITING.

use super::exec::ExecSandbox;
use super::locks::{AcquireOutcome, SentenceLockManager};
use super::persistence::DiskStore;
use super::protocol::{
    ClientCommand, ControlCommand, REPLY_ABORTED, REPLY_LOCKED, REPLY_SUCCESS, error_reply,
};
use super::sentence_store::{ContentParser, SentenceStore};
use crate::config::StorageServerConfig;
use crate::error::{DfsError, DfsResult};
use crate::wire::validate_filename;

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Writing {
        file: String,
        sentence: usize,
        holder: String,
    },
}

/// Per-connection state of a client talking to the SS.
#[derive(Debug)]
pub struct ClientSession {
    pub state: SessionState,
    /// Lock holder used when WRITE names no user.
    anonymous_id: String,
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            anonymous_id: format!("conn-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReply {
    Line(String),
    /// One line per word, followed by the stream terminator.
    Stream(Vec<String>),
    Close,
}

impl ClientReply {
    fn from_result(result: DfsResult<String>) -> Self {
        match result {
            Ok(line) => ClientReply::Line(line),
            Err(err) => ClientReply::Line(error_reply(&err)),
        }
    }
}

pub struct StorageNode {
    pub store: SentenceStore,
    pub locks: SentenceLockManager,
    pub disk: DiskStore,
    sandbox: ExecSandbox,
    stream_delay: Duration,
}

impl StorageNode {
    /// Opens the storage directory and loads every file already in it.
    pub async fn open(config: &StorageServerConfig) -> anyhow::Result<Arc<Self>> {
        let disk = DiskStore::open(&config.storage_dir).await?;
        let store = SentenceStore::new();
        let loaded = disk.load_all(&ContentParser::new()?, &store).await?;

        tracing::info!(
            "Loaded {} file(s) from {}",
            loaded,
            config.storage_dir.display()
        );

        Ok(Arc::new(Self {
            store,
            locks: SentenceLockManager::new(config.lock_lease()),
            disk,
            sandbox: ExecSandbox::new(
                config.exec_shell.clone(),
                config.exec_path.clone(),
                config.exec_timeout(),
            ),
            stream_delay: config.stream_delay(),
        }))
    }

    pub fn stream_delay(&self) -> Duration {
        self.stream_delay
    }

    // ============================================================
    // CONTROL CHANNEL (NM -> SS)
    // ============================================================

    pub async fn handle_control(&self, command: ControlCommand) -> DfsResult<String> {
        tracing::debug!("Control command: {:?}", command);

        match command {
            ControlCommand::Create { file, owner } => {
                validate_filename(&file)?;
                let doc = self.store.create(&file, &owner)?;
                if let Err(e) = self.disk.save(&doc).await {
                    self.store.remove(&file)?;
                    return Err(e);
                }
                tracing::info!("Created {} for {}", file, owner);
                Ok(format!("File '{}' created", file))
            }
            ControlCommand::Delete { file } => {
                let doc = self.store.remove(&file)?;
                let released = self.locks.release_file(&file);
                self.disk.remove(&doc).await?;
                tracing::info!("Deleted {} ({} lock(s) released)", file, released);
                Ok(format!("File '{}' deleted", file))
            }
            ControlCommand::Info { file } => Ok(self.store.stats(&file)?.to_wire()),
            ControlCommand::Undo { file } => {
                let version = self.store.undo(&file)?;
                let doc = self.store.get(&file)?;
                self.disk.save(&doc).await?;
                tracing::info!("Undo applied to {} (version {})", file, version);
                Ok(format!("Undo applied to '{}'", file))
            }
            ControlCommand::Exec { file } => {
                let commands = self.store.command_lines(&file)?;
                if commands.is_empty() {
                    return Ok("(no commands to execute)".to_string());
                }
                tracing::info!("Executing {} command(s) from {}", commands.len(), file);
                self.sandbox.run(&commands).await
            }
        }
    }

    // ============================================================
    // CLIENT CHANNEL
    // ============================================================

    pub async fn handle_client(&self, session: &mut ClientSession, command: ClientCommand) -> ClientReply {
        if matches!(command, ClientCommand::Quit) {
            if let SessionState::Writing { file, sentence, holder } = &session.state {
                tracing::warn!(
                    "{} left with {} sentence {} still locked",
                    holder,
                    file,
                    sentence
                );
            }
            return ClientReply::Close;
        }

        match session.state.clone() {
            SessionState::Idle => self.handle_idle(session, command),
            SessionState::Writing {
                file,
                sentence,
                holder,
            } => {
                self.handle_writing(session, command, &file, sentence, &holder)
                    .await
            }
        }
    }

    fn handle_idle(&self, session: &mut ClientSession, command: ClientCommand) -> ClientReply {
        match command {
            ClientCommand::Read { file } => ClientReply::from_result(self.store.read(&file)),
            ClientCommand::Stream { file } => match self.store.words(&file) {
                Ok(words) => ClientReply::Stream(words),
                Err(err) => ClientReply::Line(error_reply(&err)),
            },
            ClientCommand::Write {
                file,
                sentence,
                user,
            } => {
                let holder = user.unwrap_or_else(|| session.anonymous_id.clone());
                match self.locks.acquire(&self.store, &file, sentence, &holder) {
                    Ok(outcome) => {
                        if outcome == AcquireOutcome::Acquired {
                            tracing::info!("{} locked {} sentence {}", holder, file, sentence);
                        }
                        session.state = SessionState::Writing {
                            file,
                            sentence,
                            holder,
                        };
                        ClientReply::Line(REPLY_LOCKED.to_string())
                    }
                    Err(err) => ClientReply::Line(error_reply(&err)),
                }
            }
            ClientCommand::Update { .. } | ClientCommand::Etirw | ClientCommand::Abort => {
                ClientReply::Line(error_reply(&DfsError::InvalidArgs(
                    "no write session is open; send WRITE first".to_string(),
                )))
            }
            ClientCommand::Quit => ClientReply::Close,
        }
    }

    async fn handle_writing(
        &self,
        session: &mut ClientSession,
        command: ClientCommand,
        file: &str,
        sentence: usize,
        holder: &str,
    ) -> ClientReply {
        match command {
            ClientCommand::Update { index, content } => {
                match self.locks.set_word(file, sentence, holder, index, &content) {
                    Ok(_) => ClientReply::Line(REPLY_SUCCESS.to_string()),
                    Err(err) => {
                        if lock_lost(&err) {
                            session.state = SessionState::Idle;
                        }
                        ClientReply::Line(error_reply(&err))
                    }
                }
            }
            ClientCommand::Etirw => {
                session.state = SessionState::Idle;
                let result = match self.locks.commit(&self.store, file, sentence, holder) {
                    Ok(_) => self.persist(file).await,
                    Err(err) => Err(err),
                };
                ClientReply::from_result(result.map(|_| REPLY_SUCCESS.to_string()))
            }
            ClientCommand::Abort => {
                session.state = SessionState::Idle;
                ClientReply::from_result(
                    self.locks
                        .abort(file, sentence, holder)
                        .map(|_| REPLY_ABORTED.to_string()),
                )
            }
            ClientCommand::Write {
                file: next_file,
                sentence: next_sentence,
                ..
            } if next_file == file && next_sentence == sentence => {
                // Client retry of the open session.
                ClientReply::from_result(
                    self.locks
                        .acquire(&self.store, file, sentence, holder)
                        .map(|_| REPLY_LOCKED.to_string()),
                )
            }
            ClientCommand::Write { .. } | ClientCommand::Read { .. } | ClientCommand::Stream { .. } => {
                ClientReply::Line(error_reply(&DfsError::InvalidArgs(format!(
                    "write session on '{}' sentence {} is still open; send ETIRW or ABORT first",
                    file, sentence
                ))))
            }
            ClientCommand::Quit => ClientReply::Close,
        }
    }

    async fn persist(&self, file: &str) -> DfsResult<()> {
        let doc = self.store.get(file)?;
        self.disk.save(&doc).await
    }

    /// Drops expired locks; called from the background sweeper.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep_expired()
    }
}

fn lock_lost(err: &DfsError) -> bool {
    matches!(
        err,
        DfsError::NoActiveLock { .. } | DfsError::NotLockHolder { .. }
    )
}
