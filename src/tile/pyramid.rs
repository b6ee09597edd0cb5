//! DZI pyramid mapping.
//!
//! Pure functions that translate a DZI tile address `(level, col, row)` into
//! the region of a slide's internal pyramid that has to be decoded for it.
//!
//! DZI levels double in size at every step, from a 1x1 image at level 0 up to
//! the full-resolution image at `max_level`. Slides have a sparse internal
//! pyramid (often 1, 4, 16, 64x downsamples), so the mapper picks the closest
//! internal level, translates the source rectangle into it and leaves the
//! final resampling to the caller.
//!
//! The order of operations in [`plan_tile`] is part of the wire contract:
//! overlap is subtracted before scaling, coordinates are floored, and clamping
//! happens after scaling. Reordering shifts tile seams by a pixel.

use crate::error::TileError;
use crate::slide::{Region, SlideInfo};

/// Default DZI tile size.
pub const DEFAULT_TILE_SIZE: u32 = 510;

/// Default DZI overlap.
pub const DEFAULT_OVERLAP: u32 = 1;

// =============================================================================
// Layout
// =============================================================================

/// Tiling parameters, fixed at service start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    /// Tile edge in pixels, without overlap (at least 1)
    pub tile_size: u32,

    /// Pixels shared with each neighbouring tile
    pub overlap: u32,

    /// Clip source regions to the slide bounds
    pub limit_bounds: bool,
}

impl TileLayout {
    pub fn new(tile_size: u32, overlap: u32, limit_bounds: bool) -> Self {
        Self {
            tile_size: tile_size.max(1),
            overlap,
            limit_bounds,
        }
    }

    /// Tile edge including overlap on both sides.
    pub fn padded_size(&self) -> u64 {
        self.tile_size as u64 + 2 * self.overlap as u64
    }

    /// Upper bound on the decoded region edge.
    pub fn max_read_size(&self) -> u64 {
        2 * self.padded_size()
    }
}

impl Default for TileLayout {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE, DEFAULT_OVERLAP, true)
    }
}

// =============================================================================
// DziInfo
// =============================================================================

/// The DZI view of a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DziInfo {
    /// Level 0 width of the slide
    pub width: u64,

    /// Level 0 height of the slide
    pub height: u64,

    pub tile_size: u32,

    pub overlap: u32,

    /// Number of DZI levels
    pub levels: u32,
}

impl DziInfo {
    pub fn new(slide: &SlideInfo, layout: &TileLayout) -> Self {
        Self {
            width: slide.width,
            height: slide.height,
            tile_size: layout.tile_size,
            overlap: layout.overlap,
            levels: dzi_level_count(slide.width, slide.height, slide.level_count()),
        }
    }

    /// The full-resolution DZI level.
    pub fn max_level(&self) -> u32 {
        self.levels.saturating_sub(1)
    }

    /// Downsample of `level` relative to full resolution, as a power of two.
    fn shift(&self, level: u32) -> u32 {
        self.max_level().saturating_sub(level)
    }

    /// `2^(level - max_level)`.
    pub fn scale(&self, level: u32) -> f64 {
        (-(self.shift(level) as f64)).exp2()
    }

    /// Image dimensions at a DZI level, at least 1x1.
    pub fn level_dimensions(&self, level: u32) -> (u64, u64) {
        let shift = self.shift(level);
        (shr_floor(self.width, shift), shr_floor(self.height, shift))
    }

    /// Number of tile columns and rows at a DZI level.
    pub fn tile_grid(&self, level: u32) -> (u64, u64) {
        let (w, h) = self.level_dimensions(level);
        let t = self.tile_size.max(1) as u64;
        (w.div_ceil(t), h.div_ceil(t))
    }
}

/// `max(floor(log2(max(w, h))) + 1, internal_levels)`.
pub fn dzi_level_count(width: u64, height: u64, internal_levels: u32) -> u32 {
    let longest = width.max(height).max(1);
    (longest.ilog2() + 1).max(internal_levels)
}

fn shr_floor(value: u64, shift: u32) -> u64 {
    value.checked_shr(shift).unwrap_or(0).max(1)
}

// =============================================================================
// Tile planning
// =============================================================================

/// A rectangle in level 0 pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

/// Everything needed to render one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePlan {
    pub level: u32,
    pub col: u32,
    pub row: u32,

    /// Area of the slide covered by the tile, in level 0 pixels
    pub source: SourceRect,

    /// What to read from the decoder
    pub region: Region,

    /// Output tile width
    pub target_width: u32,

    /// Output tile height
    pub target_height: u32,
}

/// Pick the internal level whose downsample is closest to `downsample`.
///
/// Ties go to the lower (sharper) level.
pub fn best_level(slide: &SlideInfo, downsample: f64) -> u32 {
    let mut best = 0u32;
    let mut best_diff = f64::INFINITY;
    for (level, &(w, _)) in slide.level_dimensions.iter().enumerate() {
        if w == 0 {
            continue;
        }
        let level_downsample = slide.width as f64 / w as f64;
        let diff = (level_downsample - downsample).abs();
        if diff < best_diff {
            best_diff = diff;
            best = level as u32;
        }
    }
    best
}

/// Map a DZI tile address to a decoder region and an output size.
///
/// # Errors
///
/// - [`TileError::BadRequest`] if `level` is not a DZI level of the slide
/// - [`TileError::OutOfBounds`] if `col`/`row` fall outside the level's tile
///   grid or the region clips to nothing
pub fn plan_tile(
    dzi: &DziInfo,
    slide: &SlideInfo,
    layout: &TileLayout,
    level: u32,
    col: u32,
    row: u32,
) -> Result<TilePlan, TileError> {
    if level >= dzi.levels {
        return Err(TileError::BadRequest(format!(
            "invalid level: {} (max: {}, image_size: {}x{})",
            level,
            dzi.max_level(),
            dzi.width,
            dzi.height
        )));
    }

    let out_of_bounds = |reason: String| TileError::OutOfBounds {
        level,
        col,
        row,
        reason,
    };

    // 1-2. Level size and grid
    let (level_w, level_h) = dzi.level_dimensions(level);
    let (cols, rows) = dzi.tile_grid(level);
    if col as u64 >= cols || row as u64 >= rows {
        return Err(out_of_bounds(format!(
            "grid is {}x{} tiles, level size {}x{}",
            cols, rows, level_w, level_h
        )));
    }

    // 3. Source rectangle in level 0 pixels
    let shift = dzi.shift(level);
    let t = layout.tile_size as i128;
    let o = layout.overlap as i128;
    let padded = layout.padded_size() as i128;

    let src_x = clamp_origin(shl_sat(col as i128 * t - o, shift), dzi.width);
    let src_y = clamp_origin(shl_sat(row as i128 * t - o, shift), dzi.height);
    let mut src_w = to_u64(shl_sat(padded, shift));
    let mut src_h = to_u64(shl_sat(padded, shift));
    if layout.limit_bounds {
        src_w = src_w.min(dzi.width - src_x);
        src_h = src_h.min(dzi.height - src_y);
    }

    // 4. Closest internal level
    let downsample = 1.0 / dzi.scale(level);
    let k = best_level(slide, downsample);
    let (k_w, k_h) = slide
        .level_dimensions
        .get(k as usize)
        .copied()
        .ok_or_else(|| out_of_bounds(format!("decoder level {} missing", k)))?;

    // 5. Translate into level k, per axis
    let region_x = rescale(src_x, k_w, dzi.width);
    let region_y = rescale(src_y, k_h, dzi.height);
    let mut region_w = rescale(src_w, k_w, dzi.width).max(1);
    let mut region_h = rescale(src_h, k_h, dzi.height).max(1);

    // 6. Bound the decode buffer
    let cap = layout.max_read_size();
    region_w = region_w.min(cap);
    region_h = region_h.min(cap);

    // 7. Clip to level k
    if region_x >= k_w || region_y >= k_h {
        return Err(out_of_bounds(format!(
            "region origin ({}, {}) outside decoder level {} ({}x{})",
            region_x, region_y, k, k_w, k_h
        )));
    }
    if layout.limit_bounds {
        region_w = region_w.min(k_w - region_x);
        region_h = region_h.min(k_h - region_y);
    }
    if region_w == 0 || region_h == 0 {
        return Err(out_of_bounds(format!(
            "region clipped to {}x{} at decoder level {}",
            region_w, region_h, k
        )));
    }

    // 8. Output size
    let (target_w, target_h) = if layout.limit_bounds {
        let start_x = (col as u64 * layout.tile_size as u64).saturating_sub(layout.overlap as u64);
        let start_y = (row as u64 * layout.tile_size as u64).saturating_sub(layout.overlap as u64);
        (
            layout.padded_size().min(level_w - start_x),
            layout.padded_size().min(level_h - start_y),
        )
    } else {
        (layout.padded_size(), layout.padded_size())
    };

    let to_u32 = |v: u64| {
        u32::try_from(v).map_err(|_| out_of_bounds(format!("size {} exceeds u32", v)))
    };

    Ok(TilePlan {
        level,
        col,
        row,
        source: SourceRect {
            x: src_x,
            y: src_y,
            width: src_w,
            height: src_h,
        },
        region: Region {
            level: k,
            x: region_x,
            y: region_y,
            width: to_u32(region_w)?,
            height: to_u32(region_h)?,
        },
        target_width: to_u32(target_w)?,
        target_height: to_u32(target_h)?,
    })
}

/// `value * 2^shift`, saturating.
fn shl_sat(value: i128, shift: u32) -> i128 {
    if value == 0 {
        return 0;
    }
    match 1i128.checked_shl(shift) {
        Some(factor) if shift < 126 => value.saturating_mul(factor),
        _ if value > 0 => i128::MAX,
        _ => i128::MIN,
    }
}

/// Clamp a level 0 coordinate into `[0, extent)`.
fn clamp_origin(value: i128, extent: u64) -> u64 {
    value.clamp(0, extent.saturating_sub(1) as i128) as u64
}

fn to_u64(value: i128) -> u64 {
    value.clamp(0, u64::MAX as i128) as u64
}

/// `floor(value * level_extent / level0_extent)`.
fn rescale(value: u64, level_extent: u64, level0_extent: u64) -> u64 {
    if level0_extent == 0 {
        return 0;
    }
    (value as u128 * level_extent as u128 / level0_extent as u128) as u64
}
