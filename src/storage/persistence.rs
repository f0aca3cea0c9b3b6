//! On-disk layout of a Storage Server.
//!
//! `<root>/<filename>` holds the rendered content and `<root>/<filename>.meta.json`
//! the owner, creation time and the indexed sentence map. Both are replaced
//! atomically (temp file + rename). Undo snapshots and locks are never written.
//!
//! On load the sidecar's sentence map is authoritative. A file without one is
//! re-parsed from its content, numbering sentences from 0.

use super::sentence_store::{ContentParser, Document, SentenceStore};
use super::types::FileMeta;
use crate::error::{DfsError, DfsResult};
use crate::wire::validate_filename;

use anyhow::Context;
use std::path::{Path, PathBuf};

const META_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub async fn open(root: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("creating storage directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, META_SUFFIX))
    }

    /// Writes the document's current content and metadata.
    pub async fn save(&self, doc: &Document) -> DfsResult<()> {
        let _guard = doc.persist_guard.lock().await;

        // Taken after the guard so the last writer always stores the newest state.
        let (content, meta) = doc.snapshot();
        let meta = serde_json::to_vec_pretty(&meta)
            .map_err(|e| DfsError::Internal(format!("encoding metadata: {}", e)))?;

        write_atomic(&self.content_path(&doc.name), content.as_bytes()).await?;
        write_atomic(&self.meta_path(&doc.name), &meta).await?;

        tracing::debug!("Persisted {} ({} bytes)", doc.name, content.len());
        Ok(())
    }

    pub async fn remove(&self, doc: &Document) -> DfsResult<()> {
        let _guard = doc.persist_guard.lock().await;

        for path in [self.content_path(&doc.name), self.meta_path(&doc.name)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!("Failed to remove {}: {}", path.display(), e);
                    return Err(DfsError::Internal(format!(
                        "removing {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loads every stored file into `store`. Returns how many were loaded.
    pub async fn load_all(&self, parser: &ContentParser, store: &SentenceStore) -> anyhow::Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("listing {}", self.root.display()))?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(META_SUFFIX) || name.ends_with(TMP_SUFFIX) {
                continue;
            }
            if validate_filename(&name).is_err() || !entry.file_type().await?.is_file() {
                tracing::debug!("Skipping {} in storage directory", name);
                continue;
            }

            let content = tokio::fs::read_to_string(entry.path())
                .await
                .with_context(|| format!("reading {}", entry.path().display()))?;
            let mut meta = self.read_meta(&name).await;
            let sentences = match meta.sentences.take() {
                Some(sentences) => sentences,
                None => {
                    tracing::debug!("No sentence map stored for {}, parsing content", name);
                    parser.parse(&content)
                }
            };

            store.load(&name, &meta, sentences);
            loaded += 1;
        }

        Ok(loaded)
    }

    async fn read_meta(&self, name: &str) -> FileMeta {
        let path = self.meta_path(name);
        let parsed = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<FileMeta>(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        parsed.unwrap_or_else(|e| {
            tracing::warn!("No usable metadata for {} ({}), owner unknown", name, e);
            FileMeta {
                owner: "unknown".to_string(),
                created_at: crate::now_ms(),
                sentences: None,
            }
        })
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> DfsResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let result = async {
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    result.map_err(|e| {
        tracing::error!("Failed to write {}: {}", path.display(), e);
        DfsError::Internal(format!("writing {}: {}", path.display(), e))
    })
}
