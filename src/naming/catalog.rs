//! File Catalog and Access Control Store
//!
//! One `FileRecord` per file, keyed by name in a `DashMap`, so metadata and ACL
//! updates lock a single entry. Structural changes (create, delete) additionally
//! take the catalog-wide `structure` mutex, held across the round trip to the
//! Storage Server so a name cannot be created twice concurrently.

use super::types::{Access, FileRecord, Permission, StorageId};
use crate::config::ViewAllPolicy;
use crate::error::{DfsError, DfsResult};
use crate::now_ms;
use crate::storage::protocol::FileStats;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, MutexGuard};

fn not_found(name: &str) -> DfsError {
    DfsError::NotFound(format!("file '{}'", name))
}

#[derive(Default)]
pub struct FileCatalog {
    files: DashMap<String, FileRecord>,
    structure: Mutex<()>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog-wide exclusion for create and delete.
    pub async fn lock_structure(&self) -> MutexGuard<'_, ()> {
        self.structure.lock().await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn insert(&self, record: FileRecord) -> DfsResult<()> {
        match self.files.entry(record.name.clone()) {
            Entry::Occupied(_) => Err(DfsError::AlreadyExists(format!("file '{}'", record.name))),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        }
    }

    /// Adds a file reported by a registering Storage Server. Known files keep
    /// their existing owner and placement. Returns whether the file was new.
    pub fn adopt(&self, name: &str, owner: &str, storage: StorageId) -> bool {
        match self.files.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().storage != storage {
                    tracing::warn!(
                        "{} reported {} which is already placed on {}",
                        storage,
                        name,
                        existing.get().storage
                    );
                }
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(FileRecord::new(name, owner, storage, now_ms()));
                true
            }
        }
    }

    pub fn remove(&self, name: &str) -> DfsResult<FileRecord> {
        self.files
            .remove(name)
            .map(|(_, record)| record)
            .ok_or_else(|| not_found(name))
    }

    pub fn get(&self, name: &str) -> DfsResult<FileRecord> {
        self.files
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(name))
    }

    /// Returns the record if `user` holds `needed` on it.
    pub fn check_access(&self, name: &str, user: &str, needed: Permission) -> DfsResult<FileRecord> {
        let record = self.get(name)?;
        if !record.access_for(user).allows(needed) {
            return Err(DfsError::PermissionDenied(format!(
                "{} has no {} access to '{}'",
                user, needed, name
            )));
        }
        Ok(record)
    }

    /// Returns the record if `user` owns it; `action` names the refused operation.
    pub fn check_owner(&self, name: &str, user: &str, action: &str) -> DfsResult<FileRecord> {
        let record = self.get(name)?;
        if record.owner != user {
            return Err(DfsError::PermissionDenied(format!(
                "only the owner of '{}' may {}",
                name, action
            )));
        }
        Ok(record)
    }

    /// Grants `perm` to `grantee`, replacing any existing grant.
    pub fn grant(&self, name: &str, requester: &str, grantee: &str, perm: Permission) -> DfsResult<()> {
        let mut entry = self.files.get_mut(name).ok_or_else(|| not_found(name))?;
        let record = entry.value_mut();

        if record.owner != requester {
            return Err(DfsError::PermissionDenied(format!(
                "only the owner of '{}' may change its access",
                name
            )));
        }
        if record.owner == grantee {
            return Err(DfsError::InvalidArgs(format!(
                "{} already owns '{}'",
                grantee, name
            )));
        }

        record.grants.insert(grantee.to_string(), perm);
        Ok(())
    }

    pub fn revoke(&self, name: &str, requester: &str, grantee: &str) -> DfsResult<()> {
        let mut entry = self.files.get_mut(name).ok_or_else(|| not_found(name))?;
        let record = entry.value_mut();

        if record.owner != requester {
            return Err(DfsError::PermissionDenied(format!(
                "only the owner of '{}' may change its access",
                name
            )));
        }
        if record.owner == grantee {
            return Err(DfsError::InvalidArgs(format!(
                "cannot revoke the owner's access to '{}'",
                name
            )));
        }

        record
            .grants
            .remove(grantee)
            .map(|_| ())
            .ok_or_else(|| DfsError::NotFound(format!("access grant for {} on '{}'", grantee, name)))
    }

    /// Files the listing shows to `user`, sorted by name.
    pub fn visible_to(&self, user: &str, all: bool, policy: ViewAllPolicy) -> Vec<FileRecord> {
        let mut files: Vec<FileRecord> = self
            .files
            .iter()
            .filter(|entry| {
                let access = entry.value().access_for(user);
                match (policy, all) {
                    (ViewAllPolicy::BypassAcl, true) => true,
                    (ViewAllPolicy::BypassAcl, false) => access > Access::None,
                    (ViewAllPolicy::OwnershipOnly, true) => access > Access::None,
                    (ViewAllPolicy::OwnershipOnly, false) => access == Access::Owner,
                }
            })
            .map(|entry| entry.value().clone())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Stores fresh statistics from the SS and advances timestamps it reports.
    pub fn update_stats(&self, name: &str, stats: FileStats) {
        if let Some(mut entry) = self.files.get_mut(name) {
            let record = entry.value_mut();
            if stats.version != record.stats.version {
                record.modified_at = record.modified_at.max(stats.modified_at);
            }
            record.accessed_at = record.accessed_at.max(stats.accessed_at);
            record.stats = stats;
        }
    }

    pub fn touch_accessed(&self, name: &str) {
        if let Some(mut entry) = self.files.get_mut(name) {
            entry.accessed_at = now_ms();
        }
    }

    pub fn touch_modified(&self, name: &str) {
        if let Some(mut entry) = self.files.get_mut(name) {
            let now = now_ms();
            entry.modified_at = now;
            entry.accessed_at = now;
        }
    }

    pub fn count_on(&self, storage: StorageId) -> usize {
        self.files
            .iter()
            .filter(|entry| entry.value().storage == storage)
            .count()
    }
}
