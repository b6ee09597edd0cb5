//! Router for the gateway.
//!
//! ```text
//! /health           - Health check
//! /tiler/{*rest}    - Proxied to the tile service, any method
//! ```

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::proxy::{proxy_handler, GatewayState};
use crate::server::health_handler;

/// Create the gateway router.
///
/// Requests that outlive the proxy timeout are answered with `408`.
pub fn create_gateway_router(state: GatewayState, enable_tracing: bool) -> Router {
    let timeout = state.timeout();

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tiler", any(proxy_handler))
        .route("/tiler/", any(proxy_handler))
        .route("/tiler/{*rest}", any(proxy_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout));

    if enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
