//! Gateway integration tests against a real upstream on an ephemeral port.
//!
//! Tests verify:
//! - The `/tiler` prefix is stripped and the query is forwarded
//! - Status, headers and body pass through unchanged
//! - Request bodies stream to the upstream
//! - Hop-by-hop headers are dropped
//! - 502 when the upstream is unreachable, 500 when its URL is invalid
//! - A full gateway to tile service hop

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use dzi_tiler::gateway::{create_gateway_router, GatewayState};
use dzi_tiler::tile::TileLayout;
use dzi_tiler::{create_router, RouterConfig};

use super::test_utils::{image_dimensions, test_env, MemoryStore};

const TIMEOUT: Duration = Duration::from_secs(1800);

/// Serve `router` on 127.0.0.1 and return its address.
async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Upstream that describes the request it received.
async fn echo(request: Request) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let body = body.collect().await.unwrap().to_bytes();

    let seen_headers: Vec<String> = parts
        .headers
        .keys()
        .map(|name| name.as_str().to_string())
        .collect();

    (
        StatusCode::IM_A_TEAPOT,
        [
            ("x-upstream", "echo"),
            ("content-type", "application/json"),
        ],
        serde_json::json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "headers": seen_headers,
            "body": String::from_utf8_lossy(&body),
        })
        .to_string(),
    )
}

fn echo_router() -> Router {
    Router::new().fallback(echo)
}

fn gateway(upstream: &str) -> Router {
    let state = GatewayState::new(upstream, TIMEOUT).unwrap();
    create_gateway_router(state, false)
}

async fn send(router: Router, request: axum::http::Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn get_request(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn test_prefix_stripped_and_query_forwarded() {
    let addr = spawn_upstream(echo_router()).await;
    let (status, headers, body) = send(
        gateway(&addr.to_string()),
        get_request("/tiler/dzi/slides/a.svs?v=2"),
    )
    .await;

    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(headers.get("x-upstream").unwrap(), "echo");

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["method"], "GET");
    assert_eq!(json["path"], "/dzi/slides/a.svs");
    assert_eq!(json["query"], "v=2");
}

#[tokio::test]
async fn test_encoded_path_is_forwarded_raw() {
    let addr = spawn_upstream(echo_router()).await;
    let (_, _, body) = send(
        gateway(&format!("http://{}/", addr)),
        get_request("/tiler/dzi/my%20slides%2Fa.svs/files/3/0_0.jpeg"),
    )
    .await;

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["path"], "/dzi/my%20slides%2Fa.svs/files/3/0_0.jpeg");
}

#[tokio::test]
async fn test_request_body_and_method_forwarded() {
    let addr = spawn_upstream(echo_router()).await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/tiler/upload")
        .header("content-type", "text/plain")
        .header("connection", "keep-alive, x-hop")
        .header("x-hop", "1")
        .header("x-end-to-end", "1")
        .body(Body::from("slide bytes"))
        .unwrap();

    let (_, _, body) = send(gateway(&addr.to_string()), request).await;

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["method"], "POST");
    assert_eq!(json["body"], "slide bytes");

    let seen: Vec<&str> = json["headers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(seen.contains(&"x-end-to-end"));
    assert!(seen.contains(&"content-type"));
    assert!(!seen.contains(&"x-hop"));
}

#[tokio::test]
async fn test_non_tiler_routes_stay_local() {
    let addr = spawn_upstream(echo_router()).await;
    let (status, _, _) = send(gateway(&addr.to_string()), get_request("/dzi/a.svs")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (status, _, body) = send(gateway(&addr.to_string()), get_request("/tiler/health")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "bad_gateway");
    assert_eq!(json["status"], 502);
}

#[tokio::test]
async fn test_invalid_upstream_is_500() {
    let (status, _, body) = send(gateway("http://exa mple"), get_request("/tiler/health")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "invalid_upstream");
}

// =============================================================================
// Full Hop
// =============================================================================

#[tokio::test]
async fn test_gateway_to_tile_service() {
    let env = test_env(
        MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1),
        TileLayout::default(),
    );
    let tiler = create_router(env.service, RouterConfig::new().with_tracing(false));
    let addr = spawn_upstream(tiler).await;
    let router = gateway(&addr.to_string());

    let (status, headers, body) = send(router.clone(), get_request("/tiler/dzi/slides/a.svs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/xml");
    assert!(std::str::from_utf8(&body).unwrap().contains("TileSize=\"510\""));

    let (status, headers, body) = send(
        router.clone(),
        get_request("/tiler/dzi/slides/a.svs/files/9/1_1.png"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert_eq!(image_dimensions(&body), (491, 91));

    // Upstream errors pass through with their status
    let (status, _, body) = send(router.clone(), get_request("/tiler/dzi/slides/missing.svs")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "not_found");

    let (status, _, _) = send(router, get_request("/tiler/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_gateway_health_is_local() {
    let (status, _, body) = send(gateway("http://exa mple"), get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}
