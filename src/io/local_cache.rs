//! Local copies of source slides.
//!
//! Slide decoders need a seekable file, so every slide is downloaded once from
//! the object store into a flat cache directory before it is opened.
//!
//! # Guarantees
//!
//! - A file at its final name is always complete: downloads go to a hidden
//!   `.part` file that is renamed into place only after the copy finished.
//! - Failed or cancelled downloads leave nothing behind.
//! - Concurrent requests for the same slide share one download.
//!
//! Copies are never evicted; the directory is the cache's source of truth
//! and survives restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::flight::SingleFlight;

use super::store::{object_key, ObjectStore};

/// Turn an object path into a flat file name.
pub fn flatten_key(path: &str) -> String {
    object_key(path).replace(['/', '\\'], "_")
}

/// Disk-resident cache of downloaded slides.
pub struct LocalSlideCache<S: ObjectStore> {
    store: Arc<S>,
    dir: PathBuf,
    downloads: SingleFlight<Result<PathBuf, StoreError>>,
}

impl<S: ObjectStore> LocalSlideCache<S> {
    /// Create a cache rooted at `dir`. The directory is created on first download.
    pub fn new(store: Arc<S>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
            downloads: SingleFlight::new(),
        }
    }

    /// Get the cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the underlying object store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Where the local copy of `path` lives (whether or not it exists yet).
    pub fn local_path(&self, path: &str) -> PathBuf {
        self.dir.join(flatten_key(path))
    }

    /// Return the path of a complete local copy, downloading it if needed.
    pub async fn ensure_local(&self, path: &str) -> Result<PathBuf, StoreError> {
        let target = self.local_path(path);
        if file_exists(&target).await {
            return Ok(target);
        }

        let key = flatten_key(path);
        self.downloads
            .run(&key, || self.download(path, target))
            .await
    }

    async fn download(&self, path: &str, target: PathBuf) -> Result<PathBuf, StoreError> {
        // A previous leader may have finished between the probe and this run.
        if file_exists(&target).await {
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Local(format!(
                "failed to create cache dir {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        // Removed on every exit except a successful rename, including when
        // the leading request is dropped mid-copy.
        let temp = PartialFile::new(self.dir.join(format!(".{}.part", flatten_key(path))));

        info!(path = %path, local = %target.display(), "Downloading slide");
        let start = std::time::Instant::now();

        let bytes = self.copy_to(path, temp.path()).await?;
        tokio::fs::rename(temp.path(), &target).await.map_err(|e| {
            StoreError::Local(format!(
                "failed to move {} into place: {}",
                target.display(),
                e
            ))
        })?;
        temp.keep();

        info!(
            path = %path,
            bytes = bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Slide downloaded"
        );
        Ok(target)
    }

    async fn copy_to(&self, path: &str, temp: &Path) -> Result<u64, StoreError> {
        let mut reader = self.store.fetch_stream(path).await?;

        let mut file = tokio::fs::File::create(temp).await.map_err(|e| {
            StoreError::Local(format!("failed to create {}: {}", temp.display(), e))
        })?;

        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StoreError::Transport(format!("failed to download {}: {}", path, e)))?;

        file.flush()
            .await
            .map_err(|e| StoreError::Local(format!("failed to flush {}: {}", temp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::Local(format!("failed to sync {}: {}", temp.display(), e)))?;

        Ok(bytes)
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// A download in progress. The file is deleted on drop unless [`keep`] was called.
///
/// [`keep`]: PartialFile::keep
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was renamed into place.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(temp = %self.path.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(temp = %self.path.display(), error = %e, "Failed to remove partial download")
            }
        }
    }
}
