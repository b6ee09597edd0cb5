//! Disk cache for encoded tiles.
//!
//! Tiles are deterministic, so the filesystem is the source of truth and no
//! index is kept in memory. The cache directory is flat: one file per tile,
//! named `<flattened-path>_<level>_<col>_<row>.<ext>`.
//!
//! # Concurrency
//!
//! Reads and writes take no locks. Writers go through a temporary file and a
//! rename, so readers see either a complete tile or nothing. Two writers racing
//! on the same tile write identical bytes; the last rename wins.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs;

use crate::io::flatten_key;

use super::encoder::TileFormat;

// =============================================================================
// Cache Key
// =============================================================================

/// Identifies one encoded tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    /// Slide object path
    pub path: Arc<str>,

    /// DZI level
    pub level: u32,

    pub col: u32,

    pub row: u32,

    pub format: TileFormat,
}

impl TileCacheKey {
    pub fn new(path: impl Into<Arc<str>>, level: u32, col: u32, row: u32, format: TileFormat) -> Self {
        Self {
            path: path.into(),
            level,
            col,
            row,
            format,
        }
    }

    /// File name inside the cache directory.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            flatten_key(&self.path),
            self.level,
            self.col,
            self.row,
            self.format.extension()
        )
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Flat directory of encoded tiles.
pub struct TileCache {
    dir: PathBuf,

    /// Distinguishes temporary files of concurrent writers
    counter: AtomicU64,
}

impl TileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a tile file, whether or not it exists.
    pub fn tile_path(&self, key: &TileCacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read a cached tile. Any read failure counts as a miss.
    pub async fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        match fs::read(self.tile_path(key)).await {
            Ok(data) if !data.is_empty() => Some(Bytes::from(data)),
            _ => None,
        }
    }

    pub async fn contains(&self, key: &TileCacheKey) -> bool {
        fs::try_exists(self.tile_path(key)).await.unwrap_or(false)
    }

    /// Write a tile, replacing any previous copy.
    pub async fn put(&self, key: &TileCacheKey, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let target = self.tile_path(key);
        let temp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            key.file_name(),
            std::process::id(),
            self.counter.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = fs::write(&temp, data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove a cached tile. Returns whether a file was removed.
    pub async fn remove(&self, key: &TileCacheKey) -> io::Result<bool> {
        match fs::remove_file(self.tile_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
