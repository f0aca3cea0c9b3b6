//! Sentence Store
//!
//! Holds every file assigned to this Storage Server as a sparse, ordered map of
//! sentences. Readers always see committed content; in-flight edits live in the
//! lock table until commit.
//!
//! ## Concurrency
//! - The file table is a `DashMap<String, Arc<Document>>`, so lookups of different
//!   files never contend.
//! - Each `Document` guards its sentences with a `parking_lot::RwLock`. Commit and
//!   undo take the write half, which makes the undo snapshot atomic with respect
//!   to concurrent commits on other sentences of the same file.

use super::protocol::FileStats;
use super::types::{FileMeta, Sentence, SentenceMap, render_sentences};
use crate::error::{DfsError, DfsResult};
use crate::now_ms;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;

/// A sentence is everything up to and including a run of closing punctuation,
/// or a trailing fragment without one.
const SENTENCE_PATTERN: &str = r"[^.!?]*[.!?]+|[^.!?]+$";

#[derive(Debug, Clone)]
pub struct DocumentState {
    pub owner: String,
    pub sentences: SentenceMap,
    /// Full sentence map before the latest commit; consumed by undo.
    pub previous: Option<SentenceMap>,
    pub version: u64,
    pub created_at: u64,
    pub modified_at: u64,
    pub accessed_at: u64,
}

impl DocumentState {
    fn new(owner: &str, sentences: SentenceMap, created_at: u64) -> Self {
        Self {
            owner: owner.to_string(),
            sentences,
            previous: None,
            version: 0,
            created_at,
            modified_at: created_at,
            accessed_at: created_at,
        }
    }

    pub fn stats(&self) -> FileStats {
        let content = render_sentences(&self.sentences);
        let sentences = self.sentences.values().filter(|s| !s.is_empty()).count();
        let words = self
            .sentences
            .values()
            .map(|s| s.words.len())
            .sum();

        FileStats {
            size_bytes: content.len(),
            words,
            chars: content.chars().count(),
            sentences,
            version: self.version,
            has_undo: self.previous.is_some(),
            modified_at: self.modified_at,
            accessed_at: self.accessed_at,
        }
    }
}

#[derive(Debug)]
pub struct Document {
    pub name: String,
    state: RwLock<DocumentState>,
    /// Serialises disk writes of this document; held across the async write.
    pub(crate) persist_guard: tokio::sync::Mutex<()>,
}

impl Document {
    fn new(name: &str, state: DocumentState) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(state),
            persist_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn owner(&self) -> String {
        self.state.read().owner.clone()
    }

    pub fn render(&self) -> String {
        render_sentences(&self.state.read().sentences)
    }

    /// Rendered content and sidecar metadata, read under one lock.
    pub fn snapshot(&self) -> (String, FileMeta) {
        let state = self.state.read();
        let meta = FileMeta {
            owner: state.owner.clone(),
            created_at: state.created_at,
            sentences: Some(state.sentences.clone()),
        };
        (render_sentences(&state.sentences), meta)
    }

    pub fn stats(&self) -> FileStats {
        self.state.read().stats()
    }

    fn touch_accessed(&self) {
        self.state.write().accessed_at = now_ms();
    }
}

/// Splits stored plain text back into sentences, numbered from zero.
pub struct ContentParser {
    pattern: Regex,
}

impl ContentParser {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            pattern: Regex::new(SENTENCE_PATTERN)?,
        })
    }

    pub fn parse(&self, content: &str) -> SentenceMap {
        self.pattern
            .find_iter(content)
            .map(|m| {
                let words = m.as_str().split_whitespace().map(str::to_string).collect();
                Sentence::from_words(words)
            })
            .filter(|s| !s.is_empty())
            .enumerate()
            .collect()
    }
}

#[derive(Default)]
pub struct SentenceStore {
    documents: DashMap<String, Arc<Document>>,
}

impl SentenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new, empty file.
    pub fn create(&self, name: &str, owner: &str) -> DfsResult<Arc<Document>> {
        match self.documents.entry(name.to_string()) {
            Entry::Occupied(_) => Err(DfsError::AlreadyExists(format!("file '{}'", name))),
            Entry::Vacant(vacant) => {
                let doc = Arc::new(Document::new(
                    name,
                    DocumentState::new(owner, SentenceMap::new(), now_ms()),
                ));
                vacant.insert(doc.clone());
                Ok(doc)
            }
        }
    }

    /// Installs a file recovered from disk at start-up.
    pub fn load(&self, name: &str, meta: &FileMeta, sentences: SentenceMap) -> Arc<Document> {
        let doc = Arc::new(Document::new(
            name,
            DocumentState::new(&meta.owner, sentences, meta.created_at),
        ));
        self.documents.insert(name.to_string(), doc.clone());
        doc
    }

    pub fn remove(&self, name: &str) -> DfsResult<Arc<Document>> {
        self.documents
            .remove(name)
            .map(|(_, doc)| doc)
            .ok_or_else(|| DfsError::NotFound(format!("file '{}'", name)))
    }

    pub fn get(&self, name: &str) -> DfsResult<Arc<Document>> {
        self.documents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DfsError::NotFound(format!("file '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// `(owner, filename)` for every stored file, sorted by name.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut files: Vec<(String, String)> = self
            .documents
            .iter()
            .map(|entry| (entry.value().owner(), entry.key().clone()))
            .collect();
        files.sort_by(|a, b| a.1.cmp(&b.1));
        files
    }

    /// Full committed content.
    pub fn read(&self, name: &str) -> DfsResult<String> {
        let doc = self.get(name)?;
        doc.touch_accessed();
        Ok(doc.render())
    }

    /// Committed words in reading order, each delimiter glued to its sentence's last word.
    pub fn words(&self, name: &str) -> DfsResult<Vec<String>> {
        let doc = self.get(name)?;
        doc.touch_accessed();

        let state = doc.state.read();
        Ok(state
            .sentences
            .values()
            .flat_map(Sentence::to_words)
            .collect())
    }

    /// Committed words of one sentence; empty when the index is unused.
    pub fn get_sentence(&self, name: &str, index: usize) -> DfsResult<Vec<String>> {
        let doc = self.get(name)?;
        let state = doc.state.read();
        Ok(state
            .sentences
            .get(&index)
            .map(Sentence::to_words)
            .unwrap_or_default())
    }

    /// Replaces one sentence with `words`, snapshotting the previous map for undo.
    /// Returns the new version.
    pub fn set_sentence(&self, name: &str, index: usize, words: Vec<String>) -> DfsResult<u64> {
        let doc = self.get(name)?;
        let mut state = doc.state.write();

        let snapshot = state.sentences.clone();
        state.previous = Some(snapshot);

        let sentence = Sentence::from_words(words);
        if sentence.is_empty() {
            state.sentences.remove(&index);
        } else {
            state.sentences.insert(index, sentence);
        }

        state.version += 1;
        state.modified_at = now_ms();
        Ok(state.version)
    }

    /// Restores the snapshot taken by the latest commit and consumes it.
    pub fn undo(&self, name: &str) -> DfsResult<u64> {
        let doc = self.get(name)?;
        let mut state = doc.state.write();

        let previous = state
            .previous
            .take()
            .ok_or_else(|| DfsError::NothingToUndo(name.to_string()))?;
        state.sentences = previous;
        state.version += 1;
        state.modified_at = now_ms();
        Ok(state.version)
    }

    pub fn stats(&self, name: &str) -> DfsResult<FileStats> {
        Ok(self.get(name)?.stats())
    }

    /// Each non-empty committed sentence, rendered with its delimiter, in index order.
    pub fn command_lines(&self, name: &str) -> DfsResult<Vec<String>> {
        let doc = self.get(name)?;
        doc.touch_accessed();

        let state = doc.state.read();
        Ok(state
            .sentences
            .values()
            .filter(|s| !s.words.is_empty())
            .map(Sentence::render)
            .collect())
    }
}
