//! Tile Service for orchestrating tile generation.
//!
//! The TileService is the main entry point for DZI requests. It orchestrates:
//! - Request validation
//! - Slide info resolution (memoised)
//! - Tile cache lookups
//! - Coalescing of concurrent renders of the same tile
//! - Region reads through the handle cache
//! - Resampling and encoding
//! - Asynchronous tile cache writes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Parse format      5. Coalesce on tile key           │    │
//! │  │  2. Slide info        6. Read region under lease        │    │
//! │  │  3. Plan tile         7. Resample + encode              │    │
//! │  │  4. Probe tile cache  8. Spawn cache write & return     │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │        │              │                │               │        │
//! │        ▼              ▼                ▼               ▼        │
//! │  ┌───────────┐  ┌───────────┐  ┌──────────────┐  ┌───────────┐  │
//! │  │ InfoCache │  │ TileCache │  │ HandleCache  │  │TileEncoder│  │
//! │  └───────────┘  └───────────┘  └──────────────┘  └───────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::TileError;
use crate::flight::SingleFlight;
use crate::io::{object_key, ObjectStore};
use crate::slide::{argb_to_rgba, HandleCache, SlideDecoder, SlideInfo};

use super::cache::{TileCache, TileCacheKey};
use super::descriptor::DziDescriptor;
use super::encoder::{TileEncoder, TileFormat};
use super::pyramid::{plan_tile, DziInfo, TileLayout, TilePlan};

/// Default number of memoised slide infos.
pub const DEFAULT_INFO_CACHE_CAPACITY: usize = 1024;

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one DZI tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// Slide object path
    pub path: String,

    /// DZI level
    pub level: u32,

    /// Tile column
    pub col: u32,

    /// Tile row
    pub row: u32,

    /// Format name as it appears in the URL
    pub format: String,
}

impl TileRequest {
    pub fn new(
        path: impl Into<String>,
        level: u32,
        col: u32,
        row: u32,
        format: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            level,
            col,
            row,
            format: format.into(),
        }
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The encoded tile
    pub data: Bytes,

    pub format: TileFormat,

    /// Whether this tile was served from the tile cache
    pub cache_hit: bool,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Produces DZI descriptors and tiles for slides in object storage.
///
/// # Type Parameters
///
/// * `S` - The object store slides are fetched from
/// * `D` - The decoder used to open local slide copies
pub struct TileService<S: ObjectStore, D: SlideDecoder> {
    handles: Arc<HandleCache<S, D>>,

    /// Encoded tiles on disk
    tiles: Arc<TileCache>,

    encoder: TileEncoder,

    layout: TileLayout,

    /// Slide dimensions, kept after the handle is evicted
    infos: RwLock<LruCache<String, SlideInfo>>,

    /// One render per tile key at a time
    renders: SingleFlight<Result<Bytes, TileError>>,
}

impl<S: ObjectStore, D: SlideDecoder> TileService<S, D> {
    pub fn new(handles: Arc<HandleCache<S, D>>, tiles: TileCache, layout: TileLayout) -> Self {
        Self {
            handles,
            tiles: Arc::new(tiles),
            encoder: TileEncoder::new(),
            layout,
            infos: RwLock::new(LruCache::new(info_capacity(DEFAULT_INFO_CACHE_CAPACITY))),
            renders: SingleFlight::new(),
        }
    }

    /// Replace the tile encoder.
    pub fn with_encoder(mut self, encoder: TileEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Set how many slide infos are memoised.
    pub fn with_info_capacity(mut self, capacity: usize) -> Self {
        self.infos = RwLock::new(LruCache::new(info_capacity(capacity)));
        self
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn handles(&self) -> &Arc<HandleCache<S, D>> {
        &self.handles
    }

    pub fn tile_cache(&self) -> &TileCache {
        &self.tiles
    }

    /// Resolve the dimensions of a slide, opening it on first use.
    pub async fn slide_info(&self, path: &str) -> Result<SlideInfo, TileError> {
        if object_key(path).is_empty() {
            return Err(TileError::BadRequest("empty slide path".to_string()));
        }

        if let Some(info) = self.infos.read().await.peek(path) {
            return Ok(info.clone());
        }

        let lease = self.handles.get(path).await?;
        let info = lease.info().await?;
        drop(lease);

        self.infos.write().await.put(path.to_string(), info.clone());
        debug!(
            path = %path,
            width = info.width,
            height = info.height,
            levels = info.level_count(),
            "Resolved slide info"
        );
        Ok(info)
    }

    /// Get the DZI descriptor of a slide.
    pub async fn get_dzi(&self, path: &str) -> Result<DziDescriptor, TileError> {
        let info = self.slide_info(path).await?;
        Ok(DziDescriptor::new(DziInfo::new(&info, &self.layout)))
    }

    /// Get a tile, using the tile cache when available.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for an unknown format or a level outside the pyramid
    /// - `OutOfBounds` for a column or row outside the level's grid
    /// - `NotFound` if the slide object does not exist
    /// - `Decoder` / `Storage` for failures while reading or encoding
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        let start = Instant::now();
        let format = TileFormat::parse(&request.format)?;

        let info = self.slide_info(&request.path).await?;
        let dzi = DziInfo::new(&info, &self.layout);
        let plan = plan_tile(
            &dzi,
            &info,
            &self.layout,
            request.level,
            request.col,
            request.row,
        )?;

        let key = TileCacheKey::new(
            request.path.as_str(),
            request.level,
            request.col,
            request.row,
            format,
        );

        if let Some(data) = self.tiles.get(&key).await {
            debug!(
                path = %request.path,
                level = request.level,
                col = request.col,
                row = request.row,
                format = %format,
                cache_hit = true,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tile served"
            );
            return Ok(TileResponse {
                data,
                format,
                cache_hit: true,
            });
        }

        let data = self
            .renders
            .run(&key.file_name(), || self.render(&key, plan))
            .await?;

        info!(
            path = %request.path,
            level = request.level,
            col = request.col,
            row = request.row,
            format = %format,
            source_level = plan.region.level,
            cache_hit = false,
            bytes = data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tile served"
        );

        Ok(TileResponse {
            data,
            format,
            cache_hit: false,
        })
    }

    /// Close the open handle of a slide if it is idle. Memoised info and
    /// cached tiles are kept.
    pub async fn release_handle(&self, path: &str) -> bool {
        self.handles.invalidate(path).await
    }

    async fn render(&self, key: &TileCacheKey, plan: TilePlan) -> Result<Bytes, TileError> {
        let lease = self.handles.get(&key.path).await?;
        let pixels = lease.read_region(plan.region).await?;
        drop(lease);

        let encoder = self.encoder;
        let format = key.format;
        let data = tokio::task::spawn_blocking(move || {
            let image = argb_to_rgba(&pixels, plan.region.width, plan.region.height)?;
            encoder.render(image, plan.target_width, plan.target_height, format)
        })
        .await
        .map_err(|e| TileError::Decoder(format!("encoder task failed: {}", e)))??;

        let tiles = self.tiles.clone();
        let key = key.clone();
        let bytes = data.clone();
        tokio::spawn(async move {
            if let Err(e) = tiles.put(&key, &bytes).await {
                debug!(file = %key.file_name(), error = %e, "Tile cache write failed");
            }
        });

        Ok(data)
    }
}

fn info_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

// =============================================================================
// Tests
// =============================================================================
