//! # DZI Tiler
//!
//! A Deep Zoom (DZI) tile server for whole-slide images stored in
//! S3-compatible object storage, plus the gateway hop that forwards browser
//! traffic under `/tiler` to it.
//!
//! A slide is copied once from the bucket to a local cache directory, opened
//! through a [`slide::SlideDecoder`], and rendered tile by tile into JPEG or
//! PNG. Rendered tiles are kept on disk, so each tile is decoded at most once
//! per cache directory.
//!
//! ## Architecture
//!
//! - [`io`] - Object store client and local slide cache
//! - [`slide`] - Decoders and the open-handle cache
//! - [`tile`] - DZI pyramid math, encoding, tile cache and the tile service
//! - [`server`] - Axum routes for `/dzi/...`
//! - [`gateway`] - Streaming `/tiler/...` reverse proxy
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dzi_tiler::io::{create_s3_client, LocalSlideCache, S3Store};
//! use dzi_tiler::server::{create_router, RouterConfig};
//! use dzi_tiler::slide::{HandleCache, ImageDecoder};
//! use dzi_tiler::tile::{TileCache, TileLayout, TileService};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let client = create_s3_client("minio:9000", "us-east-1", "minio", "minio123").await;
//!     let store = Arc::new(S3Store::new(client, "cytology"));
//!
//!     let slides = Arc::new(LocalSlideCache::new(store, "/tmp/dzi-slides"));
//!     let handles = Arc::new(HandleCache::new(slides, ImageDecoder::new()));
//!     let service = TileService::new(
//!         handles,
//!         TileCache::new("/tmp/dzi-tiles"),
//!         TileLayout::default(),
//!     );
//!
//!     let router = create_router(service, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:50080").await?;
//!     axum::serve(listener, router).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod flight;
pub mod gateway;
pub mod io;
pub mod server;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, DecoderKind, GatewayConfig, S3Args, ServeConfig};
pub use error::{SlideError, StoreError, TileError};
pub use gateway::{create_gateway_router, GatewayState, ProxyError};
pub use io::{create_s3_client, LocalSlideCache, ObjectStore, S3Store};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use slide::{
    DecodedSlide, HandleCache, ImageDecoder, Region, SlideDecoder, SlideInfo, SlideLease,
};
pub use tile::{
    DziDescriptor, DziInfo, TileCache, TileEncoder, TileFormat, TileLayout, TileRequest,
    TileResponse, TileService,
};
