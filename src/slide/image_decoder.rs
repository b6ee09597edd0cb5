//! Pure-Rust decoder for flat raster images (PNG, JPEG, single-page TIFF).
//!
//! These formats have no internal pyramid, so one is built at open time: each
//! internal level is a 4x reduction of the previous one until the image fits
//! in [`REDUCED_LEVEL_LIMIT`] pixels on its longest side. This mirrors the
//! 4x level spacing of typical SVS files and keeps low DZI levels cheap.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageReader, RgbaImage};
use tracing::debug;

use crate::error::SlideError;

use super::decoder::{pack_argb, DecodedSlide, Region, SlideDecoder};

/// Longest side below which no further reduced level is built.
pub const REDUCED_LEVEL_LIMIT: u32 = 1024;

/// Downsample factor between consecutive internal levels.
const LEVEL_FACTOR: u32 = 4;

/// Decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SlideDecoder for ImageDecoder {
    type Slide = ImageSlide;

    fn name(&self) -> &'static str {
        "image"
    }

    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError> {
        let open_err = |message: String| SlideError::Open {
            path: path.display().to_string(),
            message,
        };

        let image = ImageReader::open(path)
            .map_err(|e| open_err(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| open_err(e.to_string()))?
            .decode()
            .map_err(|e| open_err(e.to_string()))?
            .to_rgba8();

        if image.width() == 0 || image.height() == 0 {
            return Err(open_err("image has no pixels".to_string()));
        }

        let slide = ImageSlide::from_image(image);
        debug!(
            path = %path.display(),
            levels = slide.levels.len(),
            "Opened raster slide"
        );
        Ok(slide)
    }
}

/// A decoded raster image with its reduced levels.
pub struct ImageSlide {
    levels: Vec<RgbaImage>,
}

impl ImageSlide {
    /// Build the internal pyramid for an already-decoded image.
    pub fn from_image(image: RgbaImage) -> Self {
        let mut levels = vec![image];
        loop {
            let Some(last) = levels.last() else { break };
            let (w, h) = last.dimensions();
            if w.max(h) <= REDUCED_LEVEL_LIMIT {
                break;
            }
            let next_w = (w / LEVEL_FACTOR).max(1);
            let next_h = (h / LEVEL_FACTOR).max(1);
            let reduced = imageops::resize(last, next_w, next_h, FilterType::Triangle);
            levels.push(reduced);
        }
        Self { levels }
    }

    fn level(&self, level: u32) -> Result<&RgbaImage, SlideError> {
        self.levels.get(level as usize).ok_or_else(|| {
            SlideError::Decoder(format!(
                "level {} out of range (slide has {} levels)",
                level,
                self.levels.len()
            ))
        })
    }
}

impl DecodedSlide for ImageSlide {
    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError> {
        let (w, h) = self.level(level)?.dimensions();
        Ok((w as u64, h as u64))
    }

    fn read_region(&self, region: &Region) -> Result<Vec<u32>, SlideError> {
        let image = self.level(region.level)?;
        let (level_w, level_h) = (image.width() as u64, image.height() as u64);

        let mut out = vec![0u32; region.pixel_count()];
        for row in 0..region.height as u64 {
            let sy = region.y + row;
            if sy >= level_h {
                break;
            }
            let line = &mut out[(row as usize * region.width as usize)..][..region.width as usize];
            for (col, px) in line.iter_mut().enumerate() {
                let sx = region.x + col as u64;
                if sx >= level_w {
                    break;
                }
                let [r, g, b, a] = image.get_pixel(sx as u32, sy as u32).0;
                *px = pack_argb(r, g, b, a);
            }
        }
        Ok(out)
    }
}
