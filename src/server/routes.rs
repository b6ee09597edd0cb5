//! Router configuration for the DZI tile service.
//!
//! # Route Structure
//!
//! ```text
//! /health                                          - Health check
//! /dzi/{path}                                      - DZI descriptor
//! /dzi/{path}/files/{level}/{col}_{row}.{format}   - Tile
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dzi_tiler::server::{create_router, RouterConfig};
//!
//! let router = create_router(tile_service, RouterConfig::new().with_cache_max_age(600));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:50080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::any::Any;

use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http::{Method, StatusCode};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use super::handlers::{
    dzi_handler, health_handler, AppState, ErrorResponse, DEFAULT_CACHE_MAX_AGE,
};
use crate::io::ObjectStore;
use crate::slide::SlideDecoder;
use crate::tile::TileService;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Cache max-age of 1 hour, tracing enabled.
    pub fn new() -> Self {
        Self {
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the tile service router.
///
/// Layers, outermost first: tracing (optional), CORS, panic recovery.
pub fn create_router<S, D>(tile_service: TileService<S, D>, config: RouterConfig) -> Router
where
    S: ObjectStore,
    D: SlideDecoder,
{
    let app_state = AppState::with_cache_max_age(tile_service, config.cache_max_age);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/dzi/", get(dzi_handler::<S, D>))
        .route("/dzi/{*rest}", get(dzi_handler::<S, D>))
        .with_state(app_state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(build_cors_layer());

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Any origin, GET and OPTIONS, any header.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(cors::Any)
}

/// JSON 500 for a panic inside a handler.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, "Request handler panicked");

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let body = ErrorResponse::new(
        "internal_error",
        format!("request handler panicked: {}", detail),
        status,
    );
    (status, Json(body)).into_response()
}

// =============================================================================
// Tests
// =============================================================================
