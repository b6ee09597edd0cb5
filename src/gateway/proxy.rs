//! Streaming reverse proxy for `/tiler/...`.
//!
//! Requests are forwarded to the tile service with the `/tiler` prefix removed.
//! Bodies stream in both directions; nothing is buffered.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::server::ErrorResponse;

/// Route prefix removed before forwarding.
pub const PROXY_PREFIX: &str = "/tiler";

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// The configured tile service URL does not parse
    #[error("invalid tiler URL: {0}")]
    InvalidUpstream(String),

    /// The tile service could not be reached or failed mid-request
    #[error("tiler request failed: {0}")]
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ProxyError::InvalidUpstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_upstream"),
            ProxyError::Upstream(_) => (StatusCode::BAD_GATEWAY, "bad_gateway"),
        };
        let body = ErrorResponse::new(error_type, self.to_string(), status);
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// State
// =============================================================================

/// Shared state of the gateway.
#[derive(Clone)]
pub struct GatewayState {
    client: reqwest::Client,

    /// Parsed tile service URL, or why it did not parse
    upstream: Result<Url, String>,

    timeout: Duration,
}

impl GatewayState {
    /// Build the upstream client.
    ///
    /// A malformed `tiler_url` is not an error here; every proxied request
    /// answers 500 until the configuration is fixed.
    pub fn new(tiler_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            upstream: normalize_upstream(tiler_url),
            timeout,
        })
    }

    pub fn upstream(&self) -> Result<&Url, &str> {
        self.upstream.as_ref().map_err(String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Parse the tile service URL, adding `http://` when no scheme is given.
pub fn normalize_upstream(raw: &str) -> Result<Url, String> {
    let raw = raw.trim();
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let trimmed = with_scheme.trim_end_matches('/');

    let url = Url::parse(trimmed).map_err(|e| format!("{:?}: {}", trimmed, e))?;
    if url.cannot_be_a_base() || url.host_str().map_or(true, str::is_empty) {
        return Err(format!("{:?}: missing host", trimmed));
    }
    Ok(url)
}

/// Target URL for a request path and query.
pub fn upstream_url(upstream: &Url, path: &str, query: Option<&str>) -> Url {
    let rest = path.strip_prefix(PROXY_PREFIX).unwrap_or(path);
    let mut url = upstream.clone();
    let joined = format!("{}{}", upstream.path().trim_end_matches('/'), rest);
    url.set_path(&joined);
    url.set_query(query);
    url
}

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Forward one request to the tile service.
///
/// # Endpoint
///
/// `ANY /tiler/{*rest}`
///
/// # Errors
///
/// - `500 Internal Server Error`: the tiler URL is malformed
/// - `502 Bad Gateway`: the tile service is unreachable or fails
pub async fn proxy_handler(State(state): State<GatewayState>, request: Request) -> Response {
    let start = Instant::now();

    let upstream = match &state.upstream {
        Ok(url) => url,
        Err(reason) => {
            error!(reason = %reason, "Tiler proxy: invalid tiler URL");
            return ProxyError::InvalidUpstream(reason.clone()).into_response();
        }
    };

    let (parts, body) = request.into_parts();
    let target = upstream_url(upstream, parts.uri.path(), parts.uri.query());

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    info!(
        method = %parts.method,
        original_path = %parts.uri.path(),
        proxy_url = %target,
        "Tiler proxy: forwarding request"
    );

    let result = state
        .client
        .request(parts.method.clone(), target.clone())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            error!(
                proxy_url = %target,
                original_path = %parts.uri.path(),
                error = %e,
                duration_ms = duration_ms,
                "Tiler proxy: request failed"
            );
            return ProxyError::Upstream(e.to_string()).into_response();
        }
    };

    info!(
        proxy_url = %target,
        status_code = upstream_response.status().as_u16(),
        duration_ms = duration_ms,
        "Tiler proxy: request completed"
    );

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
