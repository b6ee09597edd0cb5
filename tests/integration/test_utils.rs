//! Test utilities for integration tests.
//!
//! An in-memory object store that counts reads, and a synthetic decoder whose
//! "slide files" are one line of text:
//!
//! ```text
//! synthetic 1000x600 levels=3
//! ```
//!
//! Internal level `i` is the base image downsampled by `4^i`, like a typical
//! SVS pyramid.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use dzi_tiler::error::{SlideError, StoreError};
use dzi_tiler::io::{object_key, LocalSlideCache, ObjectReader, ObjectStore};
use dzi_tiler::slide::{pack_argb, DecodedSlide, HandleCache, Region, SlideDecoder};
use dzi_tiler::tile::{TileCache, TileCacheKey, TileLayout, TileService};

// =============================================================================
// Memory Object Store
// =============================================================================

/// Object store backed by a map, counting streamed reads per object.
pub struct MemoryStore {
    objects: HashMap<String, Bytes>,
    stream_calls: RwLock<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            stream_calls: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_object(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.objects.insert(path.into(), data.into());
        self
    }

    /// Add a synthetic slide of the given size.
    pub fn with_synthetic(self, path: impl Into<String>, width: u64, height: u64, levels: u32) -> Self {
        self.with_object(path, synthetic_slide(width, height, levels))
    }

    pub async fn stream_calls(&self, path: &str) -> usize {
        self.stream_calls
            .read()
            .await
            .get(object_key(path))
            .copied()
            .unwrap_or(0)
    }

    fn lookup(&self, path: &str) -> Result<Bytes, StoreError> {
        self.objects
            .get(object_key(path))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch_all(&self, path: &str) -> Result<Bytes, StoreError> {
        self.lookup(path)
    }

    async fn fetch_stream(&self, path: &str) -> Result<ObjectReader, StoreError> {
        *self
            .stream_calls
            .write()
            .await
            .entry(object_key(path).to_string())
            .or_insert(0) += 1;

        let data = self.lookup(path)?;
        Ok(Box::pin(std::io::Cursor::new(data.to_vec())))
    }
}

/// Contents of a synthetic slide file.
pub fn synthetic_slide(width: u64, height: u64, levels: u32) -> String {
    format!("synthetic {}x{} levels={}", width, height, levels)
}

// =============================================================================
// Synthetic Decoder
// =============================================================================

/// Counters shared by every slide a [`SyntheticDecoder`] opens.
#[derive(Default)]
pub struct DecoderStats {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,

    /// Largest region read so far, in pixels
    pub max_region_pixels: AtomicUsize,
}

impl DecoderStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn max_region_bytes(&self) -> usize {
        self.max_region_pixels.load(Ordering::SeqCst) * 4
    }
}

pub struct SyntheticDecoder {
    stats: Arc<DecoderStats>,

    /// Sleep inside every read, to widen race windows
    read_delay: Duration,

    panic_on_read: bool,
}

impl SyntheticDecoder {
    pub fn new(stats: Arc<DecoderStats>) -> Self {
        Self {
            stats,
            read_delay: Duration::ZERO,
            panic_on_read: false,
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Panic inside every region read, like a crashing native decoder.
    pub fn with_panic_on_read(mut self) -> Self {
        self.panic_on_read = true;
        self
    }
}

impl SlideDecoder for SyntheticDecoder {
    type Slide = SyntheticSlide;

    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, path: &Path) -> Result<SyntheticSlide, SlideError> {
        let open_err = |message: &str| SlideError::Open {
            path: path.display().to_string(),
            message: message.to_string(),
        };

        let text = std::fs::read_to_string(path).map_err(|e| open_err(&e.to_string()))?;
        let (width, height, levels) =
            parse_synthetic(&text).ok_or_else(|| open_err("not a synthetic slide"))?;

        self.stats.opens.fetch_add(1, Ordering::SeqCst);

        let level_dimensions = (0..levels)
            .map(|i| {
                let factor = 4u64.pow(i);
                ((width / factor).max(1), (height / factor).max(1))
            })
            .collect();

        Ok(SyntheticSlide {
            level_dimensions,
            stats: self.stats.clone(),
            read_delay: self.read_delay,
            panic_on_read: self.panic_on_read,
        })
    }
}

fn parse_synthetic(text: &str) -> Option<(u64, u64, u32)> {
    let mut parts = text.split_whitespace();
    if parts.next()? != "synthetic" {
        return None;
    }
    let (w, h) = parts.next()?.split_once('x')?;
    let levels = parts.next()?.strip_prefix("levels=")?.parse().ok()?;
    Some((w.parse().ok()?, h.parse().ok()?, levels))
}

pub struct SyntheticSlide {
    level_dimensions: Vec<(u64, u64)>,
    stats: Arc<DecoderStats>,
    read_delay: Duration,
    panic_on_read: bool,
}

impl DecodedSlide for SyntheticSlide {
    fn level_count(&self) -> u32 {
        self.level_dimensions.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError> {
        self.level_dimensions
            .get(level as usize)
            .copied()
            .ok_or_else(|| SlideError::Decoder(format!("no level {}", level)))
    }

    fn read_region(&self, region: &Region) -> Result<Vec<u32>, SlideError> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.stats
            .max_region_pixels
            .fetch_max(region.pixel_count(), Ordering::SeqCst);

        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        if self.panic_on_read {
            panic!("synthetic decoder exploded at level {}", region.level);
        }

        let mut pixels = Vec::with_capacity(region.pixel_count());
        for dy in 0..region.height as u64 {
            for dx in 0..region.width as u64 {
                let x = region.x + dx;
                let y = region.y + dy;
                let blue = (region.level as u8).wrapping_mul(60);
                pixels.push(pack_argb((x % 251) as u8, (y % 241) as u8, blue, 255));
            }
        }
        Ok(pixels)
    }
}

// =============================================================================
// Service Harness
// =============================================================================

pub type TestService = TileService<MemoryStore, SyntheticDecoder>;

/// A tile service over a [`MemoryStore`], with its cache directories in a
/// temporary directory that lives as long as the harness.
pub struct TestEnv {
    pub service: TestService,
    pub store: Arc<MemoryStore>,
    pub stats: Arc<DecoderStats>,
    pub dir: tempfile::TempDir,
}

pub fn test_env(store: MemoryStore, layout: TileLayout) -> TestEnv {
    let stats = Arc::new(DecoderStats::default());
    test_env_with_decoder(store, layout, SyntheticDecoder::new(stats.clone()), stats)
}

pub fn test_env_with_decoder(
    store: MemoryStore,
    layout: TileLayout,
    decoder: SyntheticDecoder,
    stats: Arc<DecoderStats>,
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store);

    let slides = Arc::new(LocalSlideCache::new(store.clone(), dir.path().join("slides")));
    let handles = Arc::new(HandleCache::new(slides, decoder));
    let tiles = TileCache::new(dir.path().join("tiles"));

    TestEnv {
        service: TileService::new(handles, tiles, layout),
        store,
        stats,
        dir,
    }
}

/// Wait for the background write of a tile to land in the tile cache.
pub async fn wait_for_tile(tiles: &TileCache, key: &TileCacheKey) {
    for _ in 0..200 {
        if tiles.contains(key).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tile {} was never written", key.file_name());
}

// =============================================================================
// Image Helpers
// =============================================================================

/// Decode a tile body and return its dimensions.
pub fn image_dimensions(data: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(data).expect("tile should decode");
    (image.width(), image.height())
}

pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[0] == 0xFF && data[1] == 0xD8 && data.ends_with(&[0xFF, 0xD9])
}

pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}
