//! OpenSlide-backed decoder for SVS, NDPI, MRXS and pyramidal TIFF slides.
//!
//! Only compiled with the `openslide` feature, since it links against
//! libopenslide.

use std::path::Path;

use openslide_rs::{Address, OpenSlide, Region as OsRegion, Size};
use tracing::debug;

use crate::error::SlideError;

use super::decoder::{pack_argb, DecodedSlide, Region, SlideDecoder};

/// Decoder backed by libopenslide.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSlideDecoder;

impl OpenSlideDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SlideDecoder for OpenSlideDecoder {
    type Slide = OpenSlideHandle;

    fn name(&self) -> &'static str {
        "openslide"
    }

    fn open(&self, path: &Path) -> Result<Self::Slide, SlideError> {
        let open_err = |message: String| SlideError::Open {
            path: path.display().to_string(),
            message,
        };

        let slide = OpenSlide::new(path).map_err(|e| open_err(e.to_string()))?;

        let count = slide
            .get_level_count()
            .map_err(|e| open_err(e.to_string()))?;
        let levels = (0..count)
            .map(|level| {
                slide
                    .get_level_dimensions(level)
                    .map(|d| (d.w as u64, d.h as u64))
                    .map_err(|e| open_err(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(path = %path.display(), levels = ?levels, "Opened slide with OpenSlide");

        Ok(OpenSlideHandle { slide, levels })
    }
}

/// An open OpenSlide handle with its level dimensions read at open time.
pub struct OpenSlideHandle {
    slide: OpenSlide,
    levels: Vec<(u64, u64)>,
}

impl DecodedSlide for OpenSlideHandle {
    fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    fn level_dimensions(&self, level: u32) -> Result<(u64, u64), SlideError> {
        self.levels.get(level as usize).copied().ok_or_else(|| {
            SlideError::Decoder(format!(
                "level {} out of range (slide has {} levels)",
                level,
                self.levels.len()
            ))
        })
    }

    fn read_region(&self, region: &Region) -> Result<Vec<u32>, SlideError> {
        let (w0, h0) = self.level0_dimensions()?;
        let (wk, hk) = self.level_dimensions(region.level)?;

        // OpenSlide addresses regions by their level 0 origin.
        let x0 = to_level0(region.x, w0, wk)?;
        let y0 = to_level0(region.y, h0, hk)?;

        let image = self
            .slide
            .read_image_rgba(&OsRegion {
                address: Address { x: x0, y: y0 },
                level: region.level,
                size: Size {
                    w: region.width,
                    h: region.height,
                },
            })
            .map_err(|e| SlideError::Decoder(e.to_string()))?;

        if image.dimensions() != (region.width, region.height) {
            return Err(SlideError::Decoder(format!(
                "OpenSlide returned {}x{} for a {}x{} region",
                image.width(),
                image.height(),
                region.width,
                region.height
            )));
        }

        Ok(image
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                pack_argb(r, g, b, a)
            })
            .collect())
    }
}

fn to_level0(coord: u64, level0_extent: u64, level_extent: u64) -> Result<u32, SlideError> {
    if level_extent == 0 {
        return Err(SlideError::Decoder("level has zero extent".to_string()));
    }
    let scaled = (coord as u128 * level0_extent as u128 / level_extent as u128) as u64;
    u32::try_from(scaled)
        .map_err(|_| SlideError::Decoder(format!("coordinate {} exceeds OpenSlide range", scaled)))
}
