//! HTTP request handlers for the DZI tile API.
//!
//! # Endpoints
//!
//! - `GET /dzi/{path}` - DZI descriptor XML
//! - `GET /dzi/{path}/files/{level}/{col}_{row}.{format}` - One tile
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::TileError;
use crate::io::ObjectStore;
use crate::slide::SlideDecoder;
use crate::tile::{TileRequest, TileService};

use super::dzi::{parse_dzi_url, DziTarget};

/// Default `Cache-Control: max-age` in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Response header telling whether a tile came from the tile cache.
pub const TILE_CACHE_HIT_HEADER: &str = "x-tile-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the tile service.
pub struct AppState<S: ObjectStore, D: SlideDecoder> {
    pub tile_service: Arc<TileService<S, D>>,

    /// `Cache-Control` max-age for DZI and tile responses
    pub cache_max_age: u32,
}

impl<S: ObjectStore, D: SlideDecoder> AppState<S, D> {
    pub fn new(tile_service: TileService<S, D>) -> Self {
        Self::with_cache_max_age(tile_service, DEFAULT_CACHE_MAX_AGE)
    }

    pub fn with_cache_max_age(tile_service: TileService<S, D>, cache_max_age: u32) -> Self {
        Self {
            tile_service: Arc::new(tile_service),
            cache_max_age,
        }
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

impl<S: ObjectStore, D: SlideDecoder> Clone for AppState<S, D> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "bad_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl TileError {
    /// HTTP status and error type identifier.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            TileError::NotFound { .. } => (StatusCode::BAD_REQUEST, "not_found"),
            TileError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            TileError::Decoder(_) => (StatusCode::INTERNAL_SERVER_ERROR, "decoder_error"),
            TileError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            TileError::OutOfBounds { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "out_of_bounds"),
        }
    }
}

/// Convert TileError to HTTP response.
///
/// Server errors are logged at ERROR, missing slides at DEBUG and other
/// client errors at WARN. The full message always goes to the client.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if matches!(self, TileError::NotFound { .. }) {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        (status, Json(ErrorResponse::new(error_type, message, status))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle DZI descriptor and tile requests.
///
/// # Endpoint
///
/// `GET /dzi/{*rest}`
///
/// The raw (still percent-encoded) URI path is parsed, since the slide path
/// may itself contain slashes and the first `/files/` segment separates it
/// from the tile address.
///
/// # Response
///
/// - Descriptor: `200 OK`, `application/xml`
/// - Tile: `200 OK`, `image/jpeg` or `image/png`
///
/// # Errors
///
/// - `400 Bad Request`: malformed URL, unknown format, invalid level, missing slide
/// - `500 Internal Server Error`: decoder, storage or out-of-bounds failures
pub async fn dzi_handler<S: ObjectStore, D: SlideDecoder>(
    State(state): State<AppState<S, D>>,
    uri: Uri,
) -> Result<Response, TileError> {
    match parse_dzi_url(uri.path())? {
        DziTarget::Descriptor { path } => {
            let descriptor = state.tile_service.get_dzi(&path).await?;
            Ok((
                [
                    (header::CONTENT_TYPE, "application/xml".to_string()),
                    (header::CACHE_CONTROL, state.cache_control()),
                ],
                descriptor.xml,
            )
                .into_response())
        }
        DziTarget::Tile {
            path,
            level,
            col,
            row,
            format,
        } => {
            let response = state
                .tile_service
                .get_tile(TileRequest::new(path, level, col, row, format))
                .await?;
            Ok((
                [
                    (header::CONTENT_TYPE, response.format.content_type().to_string()),
                    (header::CACHE_CONTROL, state.cache_control()),
                    (
                        HeaderName::from_static(TILE_CACHE_HIT_HEADER),
                        response.cache_hit.to_string(),
                    ),
                ],
                response.data,
            )
                .into_response())
        }
    }
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
