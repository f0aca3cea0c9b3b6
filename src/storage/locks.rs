//! Sentence Lock Manager
//!
//! Enforces at most one writer per (file, sentence). A lock moves FREE -> HELD on
//! `acquire` and back to FREE on `commit` or `abort`. While HELD, the holder's word
//! updates are buffered in a private draft that only becomes visible on commit.
//!
//! ## Leasing
//! Every HELD lock carries a lease, renewed by each word update. A different user
//! may reclaim a lock whose lease has run out, and a background sweep drops
//! expired locks so an abandoned session cannot block a sentence forever.
//!
//! ## Atomicity
//! All transitions go through the `DashMap` entry API, which holds the shard lock
//! for the key while the transition runs. Two concurrent `acquire` calls for the
//! same key are therefore strictly serialised: exactly one observes FREE.
//! Commit applies the draft to the `SentenceStore` while still holding the entry,
//! so lock order is always shard -> document.

use super::sentence_store::SentenceStore;
use super::types::LockKey;
use crate::error::{DfsError, DfsResult};
use crate::now_ms;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LockEntry {
    pub holder: String,
    pub acquired_at: u64,
    pub lease_expires: u64,
    /// In-flight words, delimiter glued to the last word like a client sees them.
    pub draft: Vec<String>,
}

impl LockEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.lease_expires
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// The caller already held the lock; nothing changed except the lease.
    AlreadyHeld,
    /// The previous holder's lease had expired and was taken over.
    Reclaimed { previous: String },
}

pub struct SentenceLockManager {
    locks: DashMap<LockKey, LockEntry>,
    lease: Duration,
}

impl SentenceLockManager {
    pub fn new(lease: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            lease,
        }
    }

    fn lease_deadline(&self, now: u64) -> u64 {
        let lease_ms = u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX);
        now.saturating_add(lease_ms)
    }

    fn new_entry(&self, store: &SentenceStore, key: &LockKey, holder: &str) -> DfsResult<LockEntry> {
        let now = now_ms();
        Ok(LockEntry {
            holder: holder.to_string(),
            acquired_at: now,
            lease_expires: self.lease_deadline(now),
            draft: store.get_sentence(&key.file, key.sentence)?,
        })
    }

    /// FREE -> HELD(holder). Re-acquiring one's own lock is a no-op success.
    pub fn acquire(
        &self,
        store: &SentenceStore,
        file: &str,
        sentence: usize,
        holder: &str,
    ) -> DfsResult<AcquireOutcome> {
        let key = LockKey::new(file, sentence);

        match self.locks.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                // The draft starts from committed content, read under the shard lock.
                vacant.insert(self.new_entry(store, &key, holder)?);
                tracing::debug!("Lock acquired: {} sentence {} by {}", file, sentence, holder);
                Ok(AcquireOutcome::Acquired)
            }
            Entry::Occupied(mut occupied) => {
                let now = now_ms();
                let entry = occupied.get_mut();

                if entry.holder == holder {
                    entry.lease_expires = self.lease_deadline(now);
                    tracing::debug!("Lock re-acquired: {} sentence {} by {}", file, sentence, holder);
                    return Ok(AcquireOutcome::AlreadyHeld);
                }

                if !entry.is_expired(now) {
                    return Err(DfsError::AlreadyLocked {
                        file: file.to_string(),
                        sentence,
                    });
                }

                let previous = std::mem::replace(entry, self.new_entry(store, &key, holder)?).holder;
                tracing::warn!(
                    "Reclaimed expired lock on {} sentence {} from {} for {}",
                    file,
                    sentence,
                    previous,
                    holder
                );
                Ok(AcquireOutcome::Reclaimed { previous })
            }
        }
    }

    /// Inserts the words of `content` into the holder's draft at `index` and renews the lease.
    /// Returns the new draft length.
    pub fn set_word(
        &self,
        file: &str,
        sentence: usize,
        holder: &str,
        index: usize,
        content: &str,
    ) -> DfsResult<usize> {
        let key = LockKey::new(file, sentence);
        let mut occupied = self.held_by(&key, holder)?;
        let now = now_ms();
        let entry = occupied.get_mut();

        if index > entry.draft.len() {
            return Err(DfsError::InvalidArgs(format!(
                "word index {} out of range (sentence has {} words)",
                index,
                entry.draft.len()
            )));
        }

        let words: Vec<String> = content.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            return Err(DfsError::InvalidArgs("no words to insert".to_string()));
        }

        entry.draft.splice(index..index, words);
        entry.lease_expires = self.lease_deadline(now);
        Ok(entry.draft.len())
    }

    /// HELD(holder) -> FREE, publishing the draft. Returns the file's new version.
    pub fn commit(
        &self,
        store: &SentenceStore,
        file: &str,
        sentence: usize,
        holder: &str,
    ) -> DfsResult<u64> {
        let key = LockKey::new(file, sentence);
        let occupied = self.held_by(&key, holder)?;

        let result = store.set_sentence(file, sentence, occupied.get().draft.clone());
        occupied.remove();

        let version = result?;
        tracing::info!(
            "Committed {} sentence {} by {} (version {})",
            file,
            sentence,
            holder,
            version
        );
        Ok(version)
    }

    /// HELD(holder) -> FREE, discarding the draft.
    pub fn abort(&self, file: &str, sentence: usize, holder: &str) -> DfsResult<()> {
        let key = LockKey::new(file, sentence);
        self.held_by(&key, holder)?.remove();
        tracing::info!("Aborted write on {} sentence {} by {}", file, sentence, holder);
        Ok(())
    }

    /// Occupied entry for `key` if `holder` owns it and the lease is live.
    /// An expired entry is dropped on the spot.
    fn held_by(
        &self,
        key: &LockKey,
        holder: &str,
    ) -> DfsResult<dashmap::mapref::entry::OccupiedEntry<'_, LockKey, LockEntry>> {
        let no_active_lock = || DfsError::NoActiveLock {
            file: key.file.clone(),
            sentence: key.sentence,
        };

        match self.locks.entry(key.clone()) {
            Entry::Vacant(_) => Err(no_active_lock()),
            Entry::Occupied(occupied) => {
                if occupied.get().holder != holder {
                    return Err(DfsError::NotLockHolder {
                        file: key.file.clone(),
                        sentence: key.sentence,
                    });
                }
                if occupied.get().is_expired(now_ms()) {
                    occupied.remove();
                    tracing::warn!(
                        "Lease on {} sentence {} expired before {} finished",
                        key.file,
                        key.sentence,
                        holder
                    );
                    return Err(no_active_lock());
                }
                Ok(occupied)
            }
        }
    }

    /// Drops every expired lock. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut removed = 0;

        self.locks.retain(|key, entry| {
            if entry.is_expired(now) {
                tracing::warn!(
                    "Lease expired: releasing {} sentence {} held by {}",
                    key.file,
                    key.sentence,
                    entry.holder
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Drops every lock on `file`, used when the file is deleted.
    pub fn release_file(&self, file: &str) -> usize {
        let before = self.locks.len();
        self.locks.retain(|key, _| key.file != file);
        before.saturating_sub(self.locks.len())
    }

    pub fn holder(&self, file: &str, sentence: usize) -> Option<String> {
        self.locks
            .get(&LockKey::new(file, sentence))
            .map(|entry| entry.holder.clone())
    }

    /// Snapshot of the holder's draft, for inspection.
    pub fn draft(&self, file: &str, sentence: usize) -> Option<Vec<String>> {
        self.locks
            .get(&LockKey::new(file, sentence))
            .map(|entry| entry.draft.clone())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
