//! Slide decoder abstraction.
//!
//! A decoder opens a local slide file and gives random access to any level of
//! the slide's internal pyramid. Level 0 is full resolution; higher levels are
//! progressively smaller. Pixels come back as packed 32-bit ARGB
//! (`0xAARRGGBB`, not premultiplied), one `u32` per pixel, row-major.
//!
//! Decoded slides are not assumed to be safe for concurrent use. The handle
//! cache serializes access with a per-handle read-write lock and only calls
//! into a slide from blocking threads.

use std::path::Path;

use image::RgbaImage;

use crate::error::SlideError;

// =============================================================================
// Region
// =============================================================================

/// A rectangle in the pixel space of one internal pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Internal pyramid level (0 = full resolution)
    pub level: u32,

    /// Left edge in level pixels
    pub x: u64,

    /// Top edge in level pixels
    pub y: u64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

impl Region {
    /// Number of pixels in the region.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

// =============================================================================
// SlideInfo
// =============================================================================

/// Dimensions of a slide and of each of its internal levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideInfo {
    /// Level 0 width in pixels
    pub width: u64,

    /// Level 0 height in pixels
    pub height: u64,

    /// `(width, height)` of every internal level, index = level
    pub level_dimensions: Vec<(u64, u64)>,
}

impl SlideInfo {
    /// Number of internal pyramid levels.
    pub fn level_count(&self) -> u32 {
        self.level_dimensions.len() as u32
    }
}

// =============================================================================
// Traits
// =============================================================================

/// An opened slide.
pub trait DecodedSlide: Send + Sync + 'static {
    /// Number of internal pyramid levels (at least 1).
    fn level_count(&self) -> u32;

    /// Dimensions of one internal level.
    fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError>;

    /// Read a region as packed ARGB pixels, `width * height` entries long.
    ///
    /// Pixels outside the level bounds are transparent (`0`).
    fn read_region(&self, region: &Region) -> Result<Vec<u32>, SlideError>;

    /// Dimensions of level 0.
    fn level0_dimensions(&self) -> Result<(u64, u64), SlideError> {
        self.level_dimensions(0)
    }

    /// Collect the dimensions of every level.
    fn info(&self) -> Result<SlideInfo, SlideError> {
        let count = self.level_count();
        if count == 0 {
            return Err(SlideError::Decoder("slide has no levels".to_string()));
        }
        let level_dimensions = (0..count)
            .map(|level| self.level_dimensions(level))
            .collect::<Result<Vec<_>, _>>()?;
        let (width, height) = level_dimensions[0];
        if width == 0 || height == 0 {
            return Err(SlideError::Decoder(format!(
                "slide has empty level 0: {}x{}",
                width, height
            )));
        }
        Ok(SlideInfo {
            width,
            height,
            level_dimensions,
        })
    }
}

/// Opens slide files. Opening is blocking and runs on a blocking thread.
pub trait SlideDecoder: Send + Sync + 'static {
    type Slide: DecodedSlide;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError>;
}

// =============================================================================
// Pixel helpers
// =============================================================================

/// Pack straight (non-premultiplied) RGBA components into one ARGB word.
#[inline]
pub fn pack_argb(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Convert a packed ARGB buffer into an RGBA image.
pub fn argb_to_rgba(pixels: &[u32], width: u32, height: u32) -> Result<RgbaImage, SlideError> {
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(SlideError::Decoder(format!(
            "region buffer has {} pixels, expected {}x{}",
            pixels.len(),
            width,
            height
        )));
    }

    let mut raw = Vec::with_capacity(expected * 4);
    for &argb in pixels {
        raw.push((argb >> 16) as u8);
        raw.push((argb >> 8) as u8);
        raw.push(argb as u8);
        raw.push((argb >> 24) as u8);
    }

    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| SlideError::Decoder("region buffer size mismatch".to_string()))
}
