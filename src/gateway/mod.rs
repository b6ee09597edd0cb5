//! Gateway hop in front of the tile service.
//!
//! Browsers talk to the gateway only. Everything under `/tiler` is streamed
//! to the tile service with the prefix removed, so `/tiler/dzi/a.svs` is
//! served by `{tiler_url}/dzi/a.svs`.

mod proxy;
mod routes;

pub use proxy::{
    normalize_upstream, proxy_handler, strip_hop_by_hop, upstream_url, GatewayState, ProxyError,
    PROXY_PREFIX,
};
pub use routes::create_gateway_router;
