//! HTTP server layer for the DZI tile service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │       GET /dzi/{path}[/files/{level}/{col}_{row}.{format}]      │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │     dzi     │  │        routes           │  │
//! │  │ (requests)  │  │ (URL parse) │  │ (CORS, panics, tracing) │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod dzi;
pub mod handlers;
pub mod routes;

pub use dzi::{descriptor_url, parse_dzi_url, tile_url, DziTarget};
pub use handlers::{
    dzi_handler, health_handler, AppState, ErrorResponse, HealthResponse, DEFAULT_CACHE_MAX_AGE,
    TILE_CACHE_HIT_HEADER,
};
pub use routes::{create_router, RouterConfig};
