//! Configuration management for the DZI tiler.
//!
//! Every option can be given on the command line or through the environment
//! variable named next to it. The binary has three subcommands:
//!
//! - `serve` - run the DZI tile service
//! - `gateway` - run the `/tiler` reverse-proxy hop in front of the tile service
//! - `check` - validate configuration and probe object storage
//!
//! # Environment Variables
//!
//! - `APP_URL` - bind address (default: localhost:50080 for serve, localhost:8080 for gateway)
//! - `TILE_SIZE` - DZI tile size in pixels (default: 510)
//! - `OVERLAP` - DZI tile overlap in pixels (default: 1)
//! - `LIMIT_BOUNDS` - clip source regions to the slide bounds (default: true)
//! - `S3_ENDPOINT` - object store endpoint (required)
//! - `S3_TOKEN_ACCESS` / `S3_TOKEN_SECRET` - static credentials (required)
//! - `S3_BUCKET_NAME` - source bucket (default: cytology)
//! - `S3_REGION` - signing region (default: us-east-1)
//! - `SLIDE_CACHE_DIR` / `TILE_CACHE_DIR` - on-disk caches (default: under the temp dir)
//! - `HANDLE_CACHE_CAPACITY` - open decoder handles (default: 10)
//! - `HANDLE_IDLE_TTL_SECS` - idle handle lifetime (default: 3600)
//! - `DECODER` - `auto`, `openslide` or `image` (default: auto)
//! - `CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `CREATE_BUCKET` - create a missing bucket at startup (default: true)
//! - `TILER_URL` - upstream tile service for the gateway (default: localhost:50080)
//! - `PROXY_TIMEOUT_SECS` - gateway request timeout (default: 1800)

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

/// Default tile service bind address.
pub const DEFAULT_APP_URL: &str = "localhost:50080";

/// Default gateway bind address.
pub const DEFAULT_GATEWAY_URL: &str = "localhost:8080";

/// Default upstream for the gateway proxy hop.
pub const DEFAULT_TILER_URL: &str = "localhost:50080";

/// Default DZI tile size.
pub const DEFAULT_TILE_SIZE: u32 = 510;

/// Default DZI tile overlap.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Default source bucket.
pub const DEFAULT_BUCKET: &str = "cytology";

/// Default signing region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of open decoder handles.
pub const DEFAULT_HANDLE_CAPACITY: usize = 10;

/// Default idle lifetime of a decoder handle in seconds (1 hour).
pub const DEFAULT_HANDLE_IDLE_TTL_SECS: u64 = 3600;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Minimum (and default) gateway timeout in seconds (30 minutes).
pub const MIN_PROXY_TIMEOUT_SECS: u64 = 1800;

/// Directory names used under the system temp dir when no cache dir is given.
const SLIDE_CACHE_DIR_NAME: &str = "tiler_cache";
const TILE_CACHE_DIR_NAME: &str = "tiler_tile_cache";

// =============================================================================
// CLI Arguments
// =============================================================================

/// DZI tiler - Deep Zoom tiles for whole-slide images stored in S3.
#[derive(Parser, Debug, Clone)]
#[command(name = "dzi-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the DZI tile service.
    Serve(ServeConfig),

    /// Run the gateway reverse-proxy hop for `/tiler/...`.
    Gateway(GatewayConfig),

    /// Validate configuration and probe object storage.
    Check(CheckConfig),
}

/// Which slide decoder the tile service should use.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// OpenSlide when compiled in, otherwise the image decoder
    Auto,
    /// libopenslide (needs the `openslide` feature)
    Openslide,
    /// Pure-Rust decoder for PNG, JPEG and flat TIFF
    Image,
}

/// Object store connection settings shared by `serve` and `check`.
#[derive(Args, Debug, Clone)]
pub struct S3Args {
    /// Object store endpoint, e.g. `minio:9000` or `https://s3.example.com`.
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: String,

    /// Static access key.
    #[arg(long, env = "S3_TOKEN_ACCESS")]
    pub s3_access_key: String,

    /// Static secret key.
    #[arg(long, env = "S3_TOKEN_SECRET", hide_env_values = true)]
    pub s3_secret_key: String,

    /// Bucket holding the source slides.
    #[arg(long, default_value = DEFAULT_BUCKET, env = "S3_BUCKET_NAME")]
    pub s3_bucket: String,

    /// Signing region.
    #[arg(long, default_value = DEFAULT_REGION, env = "S3_REGION")]
    pub s3_region: String,
}

impl S3Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.s3_endpoint.trim().is_empty() {
            return Err("S3 endpoint is required. Set --s3-endpoint or S3_ENDPOINT".to_string());
        }
        if self.s3_bucket.is_empty() {
            return Err(
                "S3 bucket name is required. Set --s3-bucket or S3_BUCKET_NAME".to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Address to bind the tile service to (host:port).
    #[arg(long, default_value = DEFAULT_APP_URL, env = "APP_URL")]
    pub app_url: String,

    // =========================================================================
    // Object Store Configuration
    // =========================================================================
    #[command(flatten)]
    pub s3: S3Args,

    /// Create the bucket at startup when it does not exist.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "CREATE_BUCKET")]
    pub create_bucket: bool,

    // =========================================================================
    // DZI Configuration
    // =========================================================================
    /// DZI tile size in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILE_SIZE")]
    pub tile_size: u32,

    /// DZI tile overlap in pixels.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "OVERLAP")]
    pub overlap: u32,

    /// Clip source regions to the slide bounds.
    ///
    /// When disabled, edge tiles read past the slide edge and are padded
    /// with transparent pixels.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "LIMIT_BOUNDS")]
    pub limit_bounds: bool,

    /// Slide decoder.
    #[arg(long, value_enum, default_value_t = DecoderKind::Auto, env = "DECODER")]
    pub decoder: DecoderKind,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Directory for local copies of source slides.
    #[arg(long, env = "SLIDE_CACHE_DIR")]
    pub slide_cache_dir: Option<PathBuf>,

    /// Directory for encoded tiles.
    #[arg(long, env = "TILE_CACHE_DIR")]
    pub tile_cache_dir: Option<PathBuf>,

    /// Maximum number of open decoder handles.
    #[arg(long, default_value_t = DEFAULT_HANDLE_CAPACITY, env = "HANDLE_CACHE_CAPACITY")]
    pub handle_capacity: usize,

    /// Seconds an unused decoder handle stays open.
    #[arg(long, default_value_t = DEFAULT_HANDLE_IDLE_TTL_SECS, env = "HANDLE_IDLE_TTL_SECS")]
    pub handle_idle_ttl: u64,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.s3.validate()?;

        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.handle_capacity == 0 {
            return Err("handle_capacity must be greater than 0".to_string());
        }
        if self.app_url.trim().is_empty() {
            return Err("APP_URL must not be empty".to_string());
        }

        Ok(())
    }

    /// Get the server bind address.
    pub fn bind_address(&self) -> String {
        bind_address(&self.app_url)
    }

    pub fn slide_cache_dir(&self) -> PathBuf {
        self.slide_cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(SLIDE_CACHE_DIR_NAME))
    }

    pub fn tile_cache_dir(&self) -> PathBuf {
        self.tile_cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(TILE_CACHE_DIR_NAME))
    }

    pub fn handle_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.handle_idle_ttl)
    }
}

#[derive(Args, Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the gateway to (host:port).
    #[arg(long, default_value = DEFAULT_GATEWAY_URL, env = "APP_URL")]
    pub app_url: String,

    /// Tile service the `/tiler` routes are forwarded to.
    #[arg(long, default_value = DEFAULT_TILER_URL, env = "TILER_URL")]
    pub tiler_url: String,

    /// Upstream request timeout in seconds (at least 30 minutes).
    #[arg(long, default_value_t = MIN_PROXY_TIMEOUT_SECS, env = "PROXY_TIMEOUT_SECS")]
    pub proxy_timeout: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.proxy_timeout < MIN_PROXY_TIMEOUT_SECS {
            return Err(format!(
                "proxy_timeout must be at least {} seconds, got {}",
                MIN_PROXY_TIMEOUT_SECS, self.proxy_timeout
            ));
        }
        if self.app_url.trim().is_empty() {
            return Err("APP_URL must not be empty".to_string());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        bind_address(&self.app_url)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub s3: S3Args,

    /// Object path of one slide to look up.
    #[arg(long)]
    pub slide: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.s3.validate()
    }
}

/// Strip an `http://` prefix so `APP_URL` may be given either as a URL or as host:port.
fn bind_address(app_url: &str) -> String {
    let addr = app_url.trim();
    let addr = addr
        .strip_prefix("http://")
        .or_else(|| addr.strip_prefix("https://"))
        .unwrap_or(addr);
    addr.trim_end_matches('/').to_string()
}

// =============================================================================
// Tests
// =============================================================================
