//! NM Dispatcher
//!
//! Executes parsed client commands against the Session Registry, File Catalog and
//! Storage Registry. Every domain error is returned to the caller, which renders
//! it as a coded response frame; none of them ends the session.

use super::catalog::FileCatalog;
use super::protocol::NmCommand;
use super::session::SessionRegistry;
use super::storage_link::{ControlConn, StorageLink, StorageRegistry};
use super::types::{Access, FileRecord, Permission, StorageId};
use crate::config::NameServerConfig;
use crate::error::{DfsError, DfsResult};
use crate::storage::protocol::{ControlCommand, FileStats};
use crate::wire::{Response, validate_filename};
use crate::{format_ms, now_ms};

use std::net::IpAddr;
use std::sync::Arc;

pub struct NamingService {
    pub config: NameServerConfig,
    pub sessions: Arc<SessionRegistry>,
    pub catalog: FileCatalog,
    pub storages: StorageRegistry,
}

/// Reply to one command and whether the session ends after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub response: Response,
    pub close: bool,
}

impl NamingService {
    pub fn new(config: NameServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            catalog: FileCatalog::new(),
            storages: StorageRegistry::new(),
        })
    }

    /// Parses and executes one line from a registered client.
    pub async fn handle_line(&self, user: &str, line: &str) -> Outcome {
        let command = match NmCommand::parse(line) {
            Ok(command) => command,
            Err(err) => {
                return Outcome {
                    response: Response::from_error(&err),
                    close: false,
                };
            }
        };

        if command == NmCommand::Quit {
            return Outcome {
                response: Response::ok("Goodbye!"),
                close: true,
            };
        }

        let op = command.name();
        let result = self.execute(user, command).await;
        match &result {
            Ok(_) => tracing::debug!("{} {} ok", user, op),
            Err(err) => tracing::debug!("{} {} failed: {}", user, op, err),
        }

        Outcome {
            response: Response::from_result(result),
            close: false,
        }
    }

    pub async fn execute(&self, user: &str, command: NmCommand) -> DfsResult<String> {
        match command {
            NmCommand::View { all, long } => Ok(self.view(user, all, long)),
            NmCommand::Create { file } => self.create(user, &file).await,
            NmCommand::Delete { file } => self.delete(user, &file).await,
            NmCommand::Info { file } => self.info(user, &file).await,
            NmCommand::List => Ok(self.list_users()),
            NmCommand::AddAccess { perm, file, user: grantee } => {
                self.add_access(user, &file, &grantee, perm)
            }
            NmCommand::RemAccess { file, user: grantee } => self.rem_access(user, &file, &grantee),
            NmCommand::Read { file } | NmCommand::Stream { file } => {
                self.redirect(user, &file, Permission::Read)
            }
            NmCommand::Write { file, sentence } => {
                let redirect = self.redirect(user, &file, Permission::Write)?;
                tracing::info!("{} redirected to write {} sentence {}", user, file, sentence);
                Ok(redirect)
            }
            NmCommand::Exec { file } => self.exec(user, &file).await,
            NmCommand::Undo { file } => self.undo(user, &file).await,
            NmCommand::Quit => Ok("Goodbye!".to_string()),
        }
    }

    // ============================================================
    // STORAGE SERVERS
    // ============================================================

    /// Registers an SS and adopts the files it reports.
    pub async fn register_storage(
        &self,
        ip: IpAddr,
        client_port: u16,
        files: Vec<(String, String)>,
        conn: ControlConn,
    ) -> Arc<StorageLink> {
        let link = self.storages.register(ip, client_port, conn).await;

        let reported = files.len();
        let adopted = files
            .into_iter()
            .filter(|(owner, name)| self.catalog.adopt(name, owner, link.id))
            .count();

        tracing::info!(
            "{} reported {} file(s), {} new to the catalog",
            link.id,
            reported,
            adopted
        );
        link
    }

    async fn forward(&self, storage: StorageId, command: ControlCommand) -> DfsResult<String> {
        let link = self.storages.active(storage)?;
        let timeout = match command {
            // Scripts run under the SS's own deadline; wait for its transcript.
            ControlCommand::Exec { .. } => self.config.exec_forward_timeout(),
            _ => self.config.forward_timeout(),
        };
        link.forward(&command, timeout).await
    }

    /// Active SS holding the fewest files; ties go to the lowest id.
    fn pick_storage(&self) -> DfsResult<StorageId> {
        self.storages
            .active_links()
            .iter()
            .min_by_key(|link| (self.catalog.count_on(link.id), link.id))
            .map(|link| link.id)
            .ok_or_else(|| DfsError::NoStorageServer("no storage server is registered".to_string()))
    }

    async fn refresh_stats(&self, record: &FileRecord) -> DfsResult<FileStats> {
        let raw = self
            .forward(
                record.storage,
                ControlCommand::Info {
                    file: record.name.clone(),
                },
            )
            .await?;
        let stats = FileStats::parse(&raw)?;
        self.catalog.update_stats(&record.name, stats);
        Ok(stats)
    }

    // ============================================================
    // FILE LIFECYCLE
    // ============================================================

    async fn create(&self, user: &str, file: &str) -> DfsResult<String> {
        validate_filename(file)?;
        let _structure = self.catalog.lock_structure().await;

        if self.catalog.contains(file) {
            return Err(DfsError::AlreadyExists(format!("file '{}'", file)));
        }

        let storage = self.pick_storage()?;
        self.forward(
            storage,
            ControlCommand::Create {
                file: file.to_string(),
                owner: user.to_string(),
            },
        )
        .await?;
        self.catalog
            .insert(FileRecord::new(file, user, storage, now_ms()))?;

        tracing::info!("{} created {} on {}", user, file, storage);
        Ok(format!("File '{}' created successfully", file))
    }

    async fn delete(&self, user: &str, file: &str) -> DfsResult<String> {
        let _structure = self.catalog.lock_structure().await;
        let record = self.catalog.check_owner(file, user, "delete it")?;

        let result = self
            .forward(
                record.storage,
                ControlCommand::Delete {
                    file: file.to_string(),
                },
            )
            .await;
        match result {
            Ok(_) => {}
            // Already gone on the SS; drop the stale catalog entry.
            Err(err) if err.is_not_found() => {
                tracing::warn!("{} was missing on {}; removing catalog entry", file, record.storage);
            }
            Err(err) => return Err(err),
        }

        self.catalog.remove(file)?;
        tracing::info!("{} deleted {}", user, file);
        Ok(format!("File '{}' deleted successfully", file))
    }

    async fn undo(&self, user: &str, file: &str) -> DfsResult<String> {
        let record = self.catalog.check_owner(file, user, "undo changes to it")?;

        self.forward(
            record.storage,
            ControlCommand::Undo {
                file: file.to_string(),
            },
        )
        .await?;
        self.catalog.touch_modified(file);
        if let Err(err) = self.refresh_stats(&record).await {
            tracing::warn!("Could not refresh statistics of {} after undo: {}", file, err);
        }

        tracing::info!("{} undid the last change to {}", user, file);
        Ok(format!("Undo successful for '{}'", file))
    }

    // ============================================================
    // CONTENT ROUTING
    // ============================================================

    fn redirect(&self, user: &str, file: &str, needed: Permission) -> DfsResult<String> {
        let record = self.catalog.check_access(file, user, needed)?;
        let link = self.storages.active(record.storage)?;

        self.catalog.touch_accessed(file);
        tracing::debug!("{} sent to {} for {}", user, link.id, file);
        Ok(link.endpoint().redirect())
    }

    async fn exec(&self, user: &str, file: &str) -> DfsResult<String> {
        let record = self.catalog.check_access(file, user, Permission::Read)?;

        tracing::info!("{} executing {}", user, file);
        let output = self
            .forward(
                record.storage,
                ControlCommand::Exec {
                    file: file.to_string(),
                },
            )
            .await?;
        self.catalog.touch_accessed(file);
        Ok(output)
    }

    // ============================================================
    // METADATA
    // ============================================================

    fn view(&self, user: &str, all: bool, long: bool) -> String {
        let files = self
            .catalog
            .visible_to(user, all, self.config.view_all_policy);

        if files.is_empty() {
            return "No files found".to_string();
        }

        if !long {
            return files
                .iter()
                .map(|record| record.name.clone())
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut lines = vec![format!(
            "{:<12} {:>8} {:>6} {:>6} {:<19} {}",
            "OWNER", "SIZE", "WORDS", "CHARS", "LAST ACCESS", "NAME"
        )];
        for record in &files {
            lines.push(format!(
                "{:<12} {:>8} {:>6} {:>6} {:<19} {}",
                record.owner,
                record.stats.size_bytes,
                record.stats.words,
                record.stats.chars,
                format_ms(record.accessed_at),
                record.name
            ));
        }
        lines.join("\n")
    }

    async fn info(&self, user: &str, file: &str) -> DfsResult<String> {
        let record = self.catalog.check_access(file, user, Permission::Read)?;

        let storage_status = match self.refresh_stats(&record).await {
            Ok(_) => self
                .storages
                .get(record.storage)
                .map(|link| format!("{} ({}:{})", link.id, link.ip, link.client_port))
                .unwrap_or_else(|| record.storage.to_string()),
            Err(err) => {
                tracing::warn!("Using cached statistics for {}: {}", file, err);
                format!("{} (unavailable, cached statistics)", record.storage)
            }
        };

        let record = self.catalog.get(file)?;
        let access = record.access_for(user);

        let mut lines = vec![
            format!("File: {}", record.name),
            format!("Owner: {}", record.owner),
            format!("Size: {} bytes", record.stats.size_bytes),
            format!("Words: {}", record.stats.words),
            format!("Characters: {}", record.stats.chars),
            format!("Sentences: {}", record.stats.sentences),
            format!("Version: {}", record.stats.version),
            format!("Created: {}", format_ms(record.created_at)),
            format!("Last Modified: {}", format_ms(record.modified_at)),
            format!("Last Accessed: {}", format_ms(record.accessed_at)),
            format!("Storage Server: {}", storage_status),
            format!("Your Access: {}", access),
        ];

        if access == Access::Owner {
            lines.push("Access List:".to_string());
            lines.push(format!("  {}: OWNER", record.owner));
            for (grantee, perm) in &record.grants {
                lines.push(format!("  {}: {}", grantee, perm));
            }
        }

        Ok(lines.join("\n"))
    }

    fn list_users(&self) -> String {
        self.sessions
            .users()
            .into_iter()
            .map(|(name, online)| {
                if online {
                    format!("{} (online)", name)
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ============================================================
    // ACCESS CONTROL
    // ============================================================

    fn add_access(&self, user: &str, file: &str, grantee: &str, perm: Permission) -> DfsResult<String> {
        self.catalog.check_owner(file, user, "change its access")?;
        if !self.sessions.is_known(grantee) {
            return Err(DfsError::NotFound(format!("user '{}'", grantee)));
        }

        self.catalog.grant(file, user, grantee, perm)?;
        tracing::info!("{} granted {} on {} to {}", user, perm, file, grantee);
        Ok(format!("Granted {} access on '{}' to {}", perm, file, grantee))
    }

    fn rem_access(&self, user: &str, file: &str, grantee: &str) -> DfsResult<String> {
        self.catalog.check_owner(file, user, "change its access")?;
        if !self.sessions.is_known(grantee) {
            return Err(DfsError::NotFound(format!("user '{}'", grantee)));
        }

        self.catalog.revoke(file, user, grantee)?;
        tracing::info!("{} revoked access on {} from {}", user, file, grantee);
        Ok(format!("Removed {}'s access to '{}'", grantee, file))
    }
}
