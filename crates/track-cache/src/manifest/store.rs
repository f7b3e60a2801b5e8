//! # Manifest Store
//!
//! Sole reader and writer of the durable index. Reads are served from an
//! in-process memo; writes go through a single FIFO chain so that every
//! read-modify-write observes the result of the one before it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::fs;
use tokio::io;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{CacheEntry, Manifest};
use crate::CacheError;

/// Outcome of a committed mutation
#[derive(Debug, Clone)]
pub struct Committed {
    pub manifest: Arc<Manifest>,
    /// Entries that fell off the end of the manifest because of the cap
    pub truncated: Vec<CacheEntry>,
}

#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    max_entries: usize,
    memo: RwLock<Option<Arc<Manifest>>>,
    // Tokio's mutex queues waiters fairly, which makes it the FIFO chain
    chain: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries,
            memo: RwLock::new(None),
            chain: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Current manifest, read from disk on first use.
    ///
    /// Never fails: a missing, unreadable or malformed document is an empty
    /// manifest.
    pub async fn load(&self) -> Arc<Manifest> {
        let memo = self.memo.read().clone();
        if let Some(manifest) = memo {
            return manifest;
        }

        let loaded = Arc::new(self.read_from_disk().await);

        let mut memo = self.memo.write();
        // A mutation may have committed while the file was being read
        memo.get_or_insert(loaded).clone()
    }

    async fn read_from_disk(&self) -> Manifest {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No manifest on disk, starting empty");
                return Manifest::default();
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read manifest");
                return Manifest::default();
            }
        };

        let value = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to parse manifest, starting empty");
                return Manifest::default();
            }
        };

        let sanitized = Manifest::from_json_value(&value, self.max_entries);
        if !sanitized.truncated.is_empty() {
            debug!(
                dropped = sanitized.truncated.len(),
                "Manifest on disk exceeded the entry cap"
            );
        }
        sanitized.manifest
    }

    /// Apply `f` to the current manifest and persist the sanitized result.
    ///
    /// Mutations run one at a time in the order they were requested. Each one
    /// loads, applies `f`, sanitizes, writes the document and only then
    /// publishes it to readers. When the write fails the memo keeps its
    /// previous value and the error is returned.
    pub async fn mutate<F>(&self, f: F) -> Result<Committed, CacheError>
    where
        F: FnOnce(Manifest) -> Manifest + Send,
    {
        let _turn = self.chain.lock().await;

        let current = self.load().await;
        let sanitized = f(Manifest::clone(&current)).sanitized(self.max_entries);

        self.persist(&sanitized.manifest).await?;

        let manifest = Arc::new(sanitized.manifest);
        *self.memo.write() = Some(manifest.clone());

        Ok(Committed {
            manifest,
            truncated: sanitized.truncated,
        })
    }

    /// Whole-document overwrite through a temporary sibling file
    async fn persist(&self, manifest: &Manifest) -> Result<(), CacheError> {
        let json = serde_json::to_vec(manifest)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&temp_path, &json).await {
            warn!(path = ?temp_path, error = %e, "Failed to write manifest");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            warn!(
                from = ?temp_path,
                to = ?self.path,
                error = %e,
                "Failed to move manifest into place"
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = ?self.path, entries = manifest.len(), "Persisted manifest");
        Ok(())
    }

    /// Remove `cache_dir` and the manifest, leaving an empty memo.
    ///
    /// Runs as a turn of the mutation chain, so it never interleaves with a
    /// mutation. File-system failures are logged and otherwise ignored.
    pub async fn wipe(&self, cache_dir: &Path) {
        let _turn = self.chain.lock().await;

        if let Err(e) = fs::remove_dir_all(cache_dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = ?cache_dir, error = %e, "Failed to remove cache directory");
            }
        }

        *self.memo.write() = Some(Arc::new(Manifest::default()));

        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "Failed to remove manifest");
            }
        }
    }
}
