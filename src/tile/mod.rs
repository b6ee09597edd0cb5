//! Tile service layer.
//!
//! This module turns slides into a Deep Zoom pyramid: DZI descriptors and
//! encoded tiles, cached on disk.
//!
//! # Architecture
//!
//! The tile service sits between the HTTP layer and the handle cache:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   Pyramid    │  │   TileEncoder   │  │
//! │  │   mapper     │  │  (resample →    │  │
//! │  │ (DZI → level)│  │   JPEG / PNG)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  SingleFlight   │  │
//! │  │  (on disk)   │  │  (per tile)     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              HandleCache                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: entry point, orchestrates the full pipeline
//! - [`plan_tile`]: maps a DZI `(level, col, row)` to a decoder region
//! - [`DziDescriptor`]: DZI info plus the rendered XML
//! - [`TileEncoder`]: Lanczos resampling and JPEG/PNG encoding
//! - [`TileCache`]: flat directory of encoded tiles

mod cache;
mod descriptor;
mod encoder;
mod pyramid;
mod service;

pub use cache::{TileCache, TileCacheKey};
pub use descriptor::{dzi_xml, DziDescriptor};
pub use encoder::{resample, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY};
pub use pyramid::{
    best_level, dzi_level_count, plan_tile, DziInfo, SourceRect, TileLayout, TilePlan,
    DEFAULT_OVERLAP, DEFAULT_TILE_SIZE,
};
pub use service::{TileRequest, TileResponse, TileService, DEFAULT_INFO_CACHE_CAPACITY};
