//! DZI Tiler - tile service and gateway binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dzi_tiler::{
    config::{CheckConfig, Cli, Command, DecoderKind, GatewayConfig, ServeConfig},
    gateway::{create_gateway_router, GatewayState},
    io::{create_s3_client, BucketStatus, LocalSlideCache, S3Store},
    server::{create_router, RouterConfig},
    slide::{HandleCache, ImageDecoder, SlideDecoder, DEFAULT_SWEEP_INTERVAL},
    tile::{TileCache, TileLayout, TileService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Gateway(config) => run_gateway(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  S3 endpoint: {}", config.s3.s3_endpoint);
    info!("  S3 bucket: {}", config.s3.s3_bucket);
    info!("  S3 region: {}", config.s3.s3_region);
    info!(
        "  DZI: tile_size={} overlap={} limit_bounds={}",
        config.tile_size, config.overlap, config.limit_bounds
    );
    info!("  Slide cache: {}", config.slide_cache_dir().display());
    info!("  Tile cache: {}", config.tile_cache_dir().display());
    info!(
        "  Handles: capacity={} idle_ttl={}s",
        config.handle_capacity, config.handle_idle_ttl
    );

    let client = create_s3_client(
        &config.s3.s3_endpoint,
        &config.s3.s3_region,
        &config.s3.s3_access_key,
        &config.s3.s3_secret_key,
    )
    .await;
    let store = S3Store::new(client, config.s3.s3_bucket.clone());

    match store
        .ensure_bucket(&config.s3.s3_region, config.create_bucket)
        .await
    {
        Ok(BucketStatus::Exists) => info!(bucket = %store.bucket(), "Bucket found"),
        Ok(BucketStatus::Created) => info!(bucket = %store.bucket(), "Bucket created"),
        Err(e) => {
            error!(bucket = %store.bucket(), error = %e, "Object store is not usable");
            return ExitCode::FAILURE;
        }
    }

    match config.decoder {
        DecoderKind::Auto => serve_with_default_decoder(config, store).await,
        DecoderKind::Image => serve_with(config, store, ImageDecoder::new()).await,
        DecoderKind::Openslide => serve_with_openslide(config, store).await,
    }
}

#[cfg(feature = "openslide")]
async fn serve_with_default_decoder(config: ServeConfig, store: S3Store) -> ExitCode {
    serve_with_openslide(config, store).await
}

#[cfg(not(feature = "openslide"))]
async fn serve_with_default_decoder(config: ServeConfig, store: S3Store) -> ExitCode {
    warn!("Built without the openslide feature, only PNG, JPEG and flat TIFF slides can be read");
    serve_with(config, store, ImageDecoder::new()).await
}

#[cfg(feature = "openslide")]
async fn serve_with_openslide(config: ServeConfig, store: S3Store) -> ExitCode {
    serve_with(config, store, dzi_tiler::slide::OpenSlideDecoder::new()).await
}

#[cfg(not(feature = "openslide"))]
async fn serve_with_openslide(_config: ServeConfig, _store: S3Store) -> ExitCode {
    error!("Decoder unavailable: rebuild with `--features openslide` to use libopenslide");
    ExitCode::FAILURE
}

async fn serve_with<D: SlideDecoder>(config: ServeConfig, store: S3Store, decoder: D) -> ExitCode {
    let slides = Arc::new(LocalSlideCache::new(
        Arc::new(store),
        config.slide_cache_dir(),
    ));
    let handles = Arc::new(HandleCache::with_capacity(
        slides,
        decoder,
        config.handle_capacity,
        config.handle_idle_ttl(),
    ));
    let _sweeper = handles.spawn_idle_sweeper(DEFAULT_SWEEP_INTERVAL);
    info!(decoder = handles.decoder_name(), "Slide decoder ready");

    let layout = TileLayout::new(config.tile_size, config.overlap, config.limit_bounds);
    let tile_service = TileService::new(handles, TileCache::new(config.tile_cache_dir()), layout);

    let router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);
    let router = create_router(tile_service, router_config);

    serve(&config.bind_address(), router, "Tile service").await
}

// =============================================================================
// Gateway Command
// =============================================================================

async fn run_gateway(config: GatewayConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let state = match GatewayState::new(&config.tiler_url, config.proxy_timeout()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build the upstream client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match state.upstream() {
        Ok(url) => info!(tiler_url = %url, "Forwarding /tiler requests"),
        Err(reason) => warn!(
            reason = %reason,
            "TILER_URL is invalid, /tiler requests will fail with 500"
        ),
    }
    info!("  Proxy timeout: {}s", config.proxy_timeout);

    let router = create_gateway_router(state, !config.no_tracing);
    serve(&config.bind_address(), router, "Gateway").await
}

async fn serve(addr: &str, router: axum::Router, name: &str) -> ExitCode {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("{} listening on http://{}", name, addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("DZI Tiler Configuration Check");
    println!("═════════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Endpoint: {}", config.s3.s3_endpoint);
    println!("✓ Bucket: {}", config.s3.s3_bucket);
    println!("✓ Region: {}", config.s3.s3_region);
    println!();

    print!("Testing object store connection... ");

    let client = create_s3_client(
        &config.s3.s3_endpoint,
        &config.s3.s3_region,
        &config.s3.s3_access_key,
        &config.s3.s3_secret_key,
    )
    .await;
    let store = S3Store::new(client, config.s3.s3_bucket.clone());

    if let Err(e) = store.ensure_bucket(&config.s3.s3_region, false).await {
        println!("✗ failed");
        println!();
        println!("Error: {}", e);
        println!();
        println!("Please check:");
        println!("  - The access and secret keys are correct");
        println!("  - The bucket '{}' exists", store.bucket());
        println!("  - The endpoint is reachable");
        return ExitCode::FAILURE;
    }
    println!("✓ success");

    if let Some(ref slide) = config.slide {
        println!();
        print!("Testing slide '{}'... ", slide);

        match store.head(slide).await {
            Ok(size) => {
                println!("✓ found");
                println!("  Size: {:.2} MB", size as f64 / (1024.0 * 1024.0));
            }
            Err(e) => {
                println!("✗ {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("═════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dzi_tiler=debug,tower_http=debug"
    } else {
        "dzi_tiler=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
