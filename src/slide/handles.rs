//! Cache of open slide handles.
//!
//! Opening a slide means downloading it (once) and parsing its headers, so
//! handles are kept open and shared by every request for the same slide.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HandleCache                           │
//! │  entries: Mutex<HashMap<path, Arc<HandleEntry>>>             │
//! │                                                              │
//! │  get(path) ──► hit ──► in_use += 1 ──► SlideLease            │
//! │       │                                                      │
//! │       └──────► miss ──► SingleFlight(path)                   │
//! │                           ├─ LocalSlideCache::ensure_local   │
//! │                           ├─ SlideDecoder::open (blocking)   │
//! │                           └─ insert (sweep, evict idle LRU)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each entry carries its own read-write lock. Reads take it shared on a
//! blocking thread; closing takes it exclusive and empties the slot, so a read
//! that races a close fails with [`SlideError::HandleClosed`] instead of
//! touching a closed handle.
//!
//! Eviction only picks entries with no outstanding lease. When every entry is
//! leased the new handle is still admitted and the cache runs over capacity
//! until the next insertion or sweep finds idle entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SlideError;
use crate::flight::SingleFlight;
use crate::io::{LocalSlideCache, ObjectStore};

use super::decoder::{DecodedSlide, Region, SlideDecoder, SlideInfo};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of open handles.
pub const DEFAULT_HANDLE_CAPACITY: usize = 10;

/// Default idle lifetime of a handle.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

/// How often the background sweeper looks for idle handles.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Lookups retried when a freshly opened handle is evicted before use.
const MAX_LOOKUP_ATTEMPTS: usize = 3;

// =============================================================================
// HandleEntry
// =============================================================================

struct HandleEntry<T> {
    /// The open slide; `None` once closed
    slide: RwLock<Option<T>>,

    /// Outstanding leases
    in_use: AtomicUsize,

    /// Last lease time in milliseconds since the cache epoch
    last_used: AtomicU64,

    /// Local copy the handle was opened from
    local_path: PathBuf,
}

impl<T: Send + Sync + 'static> HandleEntry<T> {
    fn is_idle(&self) -> bool {
        self.in_use.load(Ordering::SeqCst) == 0
    }

    /// Take the exclusive lock, empty the slot and drop the handle off the runtime.
    async fn close(&self) {
        let slide = self.slide.write().await.take();
        if let Some(slide) = slide {
            tokio::task::spawn_blocking(move || drop(slide));
        }
    }
}

// =============================================================================
// SlideLease
// =============================================================================

/// An in-use marker for one open handle.
///
/// The handle is not evicted while a lease exists. Dropping the lease releases it.
pub struct SlideLease<T: DecodedSlide> {
    entry: Arc<HandleEntry<T>>,
    path: String,
}

impl<T: DecodedSlide> SlideLease<T> {
    /// Object path of the slide.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Local file the handle was opened from.
    pub fn local_path(&self) -> &Path {
        &self.entry.local_path
    }

    /// Run `f` against the open slide on a blocking thread, holding the
    /// handle's shared lock.
    pub async fn with_slide<R, F>(&self, f: F) -> Result<R, SlideError>
    where
        F: FnOnce(&T) -> Result<R, SlideError> + Send + 'static,
        R: Send + 'static,
    {
        let entry = self.entry.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let guard = entry.slide.blocking_read();
            match guard.as_ref() {
                Some(slide) => f(slide),
                None => Err(SlideError::HandleClosed(path)),
            }
        })
        .await
        .map_err(|e| SlideError::Decoder(format!("decoder task failed: {}", e)))?
    }

    /// Read the slide's level dimensions.
    pub async fn info(&self) -> Result<SlideInfo, SlideError> {
        self.with_slide(|slide| slide.info()).await
    }

    /// Read a region as packed ARGB pixels.
    pub async fn read_region(&self, region: Region) -> Result<Vec<u32>, SlideError> {
        self.with_slide(move |slide| slide.read_region(&region)).await
    }
}

impl<T: DecodedSlide> Drop for SlideLease<T> {
    fn drop(&mut self) {
        self.entry.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// HandleCache
// =============================================================================

/// Bounded map from object path to open slide handle.
pub struct HandleCache<S: ObjectStore, D: SlideDecoder> {
    slides: Arc<LocalSlideCache<S>>,
    decoder: Arc<D>,
    entries: Mutex<HashMap<String, Arc<HandleEntry<D::Slide>>>>,
    opens: SingleFlight<Result<(), SlideError>>,
    capacity: usize,
    idle_ttl: Duration,
    epoch: Instant,
}

impl<S: ObjectStore, D: SlideDecoder> HandleCache<S, D> {
    /// Create a cache with the default capacity and idle TTL.
    pub fn new(slides: Arc<LocalSlideCache<S>>, decoder: D) -> Self {
        Self::with_capacity(slides, decoder, DEFAULT_HANDLE_CAPACITY, DEFAULT_IDLE_TTL)
    }

    /// Create a cache with custom limits.
    ///
    /// # Arguments
    /// * `slides` - Local slide cache used to materialise files before opening
    /// * `decoder` - Decoder used to open slides
    /// * `capacity` - Number of handles kept open (values below 1 are treated as 1)
    /// * `idle_ttl` - Handles unused for longer than this are closed
    pub fn with_capacity(
        slides: Arc<LocalSlideCache<S>>,
        decoder: D,
        capacity: usize,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            slides,
            decoder: Arc::new(decoder),
            entries: Mutex::new(HashMap::new()),
            opens: SingleFlight::new(),
            capacity: capacity.max(1),
            idle_ttl,
            epoch: Instant::now(),
        }
    }

    /// Get the decoder name.
    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    /// Get the local slide cache.
    pub fn local_cache(&self) -> &Arc<LocalSlideCache<S>> {
        &self.slides
    }

    /// Get a lease on the handle for `path`, opening the slide if needed.
    pub async fn get(&self, path: &str) -> Result<SlideLease<D::Slide>, SlideError> {
        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            if let Some(lease) = self.lookup(path).await {
                return Ok(lease);
            }
            self.opens
                .run(path, || self.open_and_insert(path))
                .await?;
        }

        Err(SlideError::HandleClosed(format!(
            "{} was evicted before it could be used",
            path
        )))
    }

    async fn lookup(&self, path: &str) -> Option<SlideLease<D::Slide>> {
        let entries = self.entries.lock().await;
        let entry = entries.get(path)?;
        entry.in_use.fetch_add(1, Ordering::SeqCst);
        entry.last_used.store(self.now_ms(), Ordering::SeqCst);
        Some(SlideLease {
            entry: entry.clone(),
            path: path.to_string(),
        })
    }

    async fn open_and_insert(&self, path: &str) -> Result<(), SlideError> {
        // Another leader may have finished just before this one started.
        if self.entries.lock().await.contains_key(path) {
            return Ok(());
        }

        let local_path = self.slides.ensure_local(path).await?;

        let start = Instant::now();
        let decoder = self.decoder.clone();
        let open_path = local_path.clone();
        let slide = tokio::task::spawn_blocking(move || decoder.open(&open_path))
            .await
            .map_err(|e| SlideError::Decoder(format!("open task failed: {}", e)))??;

        info!(
            path = %path,
            decoder = self.decoder.name(),
            levels = slide.level_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Opened slide handle"
        );

        let entry = Arc::new(HandleEntry {
            slide: RwLock::new(Some(slide)),
            in_use: AtomicUsize::new(0),
            last_used: AtomicU64::new(self.now_ms()),
            local_path,
        });

        let evicted = {
            let mut entries = self.entries.lock().await;
            let mut evicted = self.take_expired(&mut entries);

            while entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .filter(|(_, e)| e.is_idle())
                    .min_by_key(|(_, e)| e.last_used.load(Ordering::SeqCst))
                    .map(|(k, _)| k.clone());

                match oldest {
                    Some(key) => {
                        if let Some(e) = entries.remove(&key) {
                            debug!(path = %key, "Evicting least recently used handle");
                            evicted.push(e);
                        }
                    }
                    None => {
                        warn!(
                            open = entries.len(),
                            capacity = self.capacity,
                            "All handles in use, admitting over capacity"
                        );
                        break;
                    }
                }
            }

            entries.insert(path.to_string(), entry);
            evicted
        };

        for entry in evicted {
            entry.close().await;
        }

        Ok(())
    }

    /// Remove idle entries past the TTL from the map (closing is up to the caller).
    fn take_expired(
        &self,
        entries: &mut HashMap<String, Arc<HandleEntry<D::Slide>>>,
    ) -> Vec<Arc<HandleEntry<D::Slide>>> {
        let now = self.now_ms();
        let ttl = self.idle_ttl.as_millis() as u64;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| {
                e.is_idle() && now.saturating_sub(e.last_used.load(Ordering::SeqCst)) >= ttl
            })
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                debug!(path = %key, "Closing idle handle");
                entries.remove(&key)
            })
            .collect()
    }

    /// Close every idle handle past the TTL. Returns how many were closed.
    pub async fn sweep_idle(&self) -> usize {
        let expired = {
            let mut entries = self.entries.lock().await;
            self.take_expired(&mut entries)
        };
        let count = expired.len();
        for entry in expired {
            entry.close().await;
        }
        count
    }

    /// Close the handle for `path` if nothing is using it.
    ///
    /// Returns `true` if a handle was closed.
    pub async fn invalidate(&self, path: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock().await;
            match entries.get(path) {
                Some(e) if e.is_idle() => entries.remove(path),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.close().await;
                true
            }
            None => false,
        }
    }

    /// Number of open handles.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a handle for `path` is open.
    pub async fn contains(&self, path: &str) -> bool {
        self.entries.lock().await.contains_key(path)
    }

    /// Spawn a task that calls [`sweep_idle`](Self::sweep_idle) every `every`.
    ///
    /// The task holds a weak reference and stops once the cache is dropped.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(strong) = cache.upgrade() else { break };
                let closed = strong.sweep_idle().await;
                drop(strong);
                if closed > 0 {
                    info!(closed = closed, "Closed idle slide handles");
                }
            }
        })
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
