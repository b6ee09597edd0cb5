//! Slide access layer.
//!
//! Turns an object path into an open, shareable slide handle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! └────────────────────┬────────────────────┘
//!                      │ get(path) -> SlideLease
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              HandleCache                │
//! │  (open handles, idle TTL, LRU eviction) │
//! └──────────┬─────────────────────┬────────┘
//!            │ ensure_local        │ open
//!            ▼                     ▼
//! ┌────────────────────┐  ┌─────────────────────────┐
//! │  LocalSlideCache   │  │   SlideDecoder trait    │
//! │  (io module)       │  ├────────────┬────────────┤
//! └────────────────────┘  │ OpenSlide  │   Image    │
//!                         └────────────┴────────────┘
//! ```

mod decoder;
mod handles;
mod image_decoder;
#[cfg(feature = "openslide")]
mod openslide;

pub use decoder::{argb_to_rgba, pack_argb, DecodedSlide, Region, SlideDecoder, SlideInfo};
pub use handles::{
    HandleCache, SlideLease, DEFAULT_HANDLE_CAPACITY, DEFAULT_IDLE_TTL, DEFAULT_SWEEP_INTERVAL,
};
pub use image_decoder::{ImageDecoder, ImageSlide, REDUCED_LEVEL_LIMIT};
#[cfg(feature = "openslide")]
pub use openslide::{OpenSlideDecoder, OpenSlideHandle};
