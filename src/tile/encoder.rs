//! Tile encoder.
//!
//! Turns a decoded region into the bytes served to the client: resample to the
//! planned tile size, then encode as JPEG or PNG.
//!
//! # Design Decisions
//!
//! - **Lanczos resampling**: regions are read from the nearest internal level
//!   and almost never match the DZI tile size exactly. Lanczos3 keeps edges
//!   sharp across the 2x steps between DZI levels.
//!
//! - **White background for JPEG**: JPEG has no alpha channel. Transparent
//!   pixels (slide background, padding past the slide edge) are composited
//!   onto white instead of being dropped to black.
//!
//! - **PNG keeps alpha**: PNG tiles are written as RGBA.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};

use crate::error::TileError;

/// JPEG quality used for all tiles.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

// =============================================================================
// TileFormat
// =============================================================================

/// Output format of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    /// Parse a format name from a tile URL (`jpeg`, `jpg`, `png`).
    pub fn parse(name: &str) -> Result<Self, TileError> {
        match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(TileFormat::Jpeg),
            "png" => Ok(TileFormat::Png),
            _ => Err(TileError::BadRequest(format!(
                "unsupported tile format: {:?} (expected jpeg, jpg or png)",
                name
            ))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }

    /// File extension used by the tile cache.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
        }
    }
}

impl FromStr for TileFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// =============================================================================
// TileEncoder
// =============================================================================

/// Resamples and encodes tiles. Stateless apart from the JPEG quality.
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    jpeg_quality: u8,
}

impl TileEncoder {
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Quality is clamped to 1..=100.
    pub fn with_quality(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Resample `image` to `width x height` (if needed) and encode it.
    pub fn render(
        &self,
        image: RgbaImage,
        width: u32,
        height: u32,
        format: TileFormat,
    ) -> Result<Bytes, TileError> {
        let image = resample(image, width, height);
        self.encode(&image, format)
    }

    /// Encode an image as-is.
    pub fn encode(&self, image: &RgbaImage, format: TileFormat) -> Result<Bytes, TileError> {
        let (width, height) = image.dimensions();
        let mut output = Vec::new();

        match format {
            TileFormat::Jpeg => {
                let rgb = flatten_on_white(image);
                JpegEncoder::new_with_quality(&mut output, self.jpeg_quality)
                    .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| TileError::Decoder(format!("JPEG encoding failed: {}", e)))?;
            }
            TileFormat::Png => {
                PngEncoder::new(&mut output)
                    .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| TileError::Decoder(format!("PNG encoding failed: {}", e)))?;
            }
        }

        Ok(Bytes::from(output))
    }
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lanczos3 resample, skipped when the size already matches.
pub fn resample(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    imageops::resize(&image, width.max(1), height.max(1), FilterType::Lanczos3)
}

/// Composite straight alpha onto an opaque white background.
fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut raw = Vec::with_capacity(width as usize * height as usize * 3);
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        let a = a as u32;
        for c in [r, g, b] {
            raw.push(((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8);
        }
    }
    // Buffer length matches the dimensions
    RgbImage::from_raw(width, height, raw).unwrap_or_else(|| RgbImage::new(width, height))
}
