//! Pixel renderers: decoded bands in, RGBA bytes out.
//!
//! Every renderer produces `width * height * 4` bytes. Pixels outside the active mask and
//! pixels the raster does not cover stay `[0, 0, 0, 0]`.

pub mod color_ramp;
pub mod custom;
pub mod photometric;
pub mod terrain;

use std::sync::Arc;

use crate::error::CogResult;
use crate::mask::MaskRows;
use crate::metadata::RasterMetadata;
use crate::raster::DecodedTile;
use crate::xyz_tile::TileIndex;

use color_ramp::{ColorRampProvider, ColorRampRenderer, ColorScale};
use photometric::PhotometricRenderer;
use terrain::TerrainRenderer;

/// Read-only context of a single render call.
#[derive(Debug, Clone)]
pub struct RendererMetadata {
    pub raster: Arc<RasterMetadata>,
    pub tile: TileIndex,
    pub tile_size: usize,
    pub mask_rows: Option<Arc<MaskRows>>,
    pub color_scale: Option<ColorScale>,
}

impl RendererMetadata {
    #[must_use]
    pub fn new(raster: Arc<RasterMetadata>, tile: TileIndex, tile_size: usize) -> Self {
        Self {
            raster,
            tile,
            tile_size,
            mask_rows: None,
            color_scale: None,
        }
    }

    #[must_use]
    pub fn with_mask_rows(mut self, mask_rows: Option<Arc<MaskRows>>) -> Self {
        self.mask_rows = mask_rows;
        self
    }

    #[must_use]
    pub fn with_color_scale(mut self, color_scale: Option<ColorScale>) -> Self {
        self.color_scale = color_scale;
        self
    }
}

/// Anything that can turn a decoded tile into RGBA.
pub trait TileRenderer: Send + Sync {
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>>;
}

/// Built-in rendering modes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RenderMode {
    #[default]
    Photometric,
    Terrain,
    ColorRamp(ColorScale),
}

/// Render with one of the built-in renderers.
pub fn render_tile(
    tile: &DecodedTile,
    metadata: &RendererMetadata,
    mode: &RenderMode,
    ramps: &Arc<dyn ColorRampProvider>,
) -> CogResult<Vec<u8>> {
    match mode {
        RenderMode::Photometric => PhotometricRenderer.render(tile, metadata),
        RenderMode::Terrain => TerrainRenderer.render(tile, metadata),
        RenderMode::ColorRamp(scale) => {
            ColorRampRenderer::new(Arc::clone(ramps), scale.clone()).render(tile, metadata)
        }
    }
}

/// Run `color_pixel(pixel_index, rgba)` for every pixel the active mask lets through.
///
/// Without mask rows every pixel is visited. With mask rows, tile-local rows and columns are
/// shifted by the tile's offset from the zoom window origin, then rows without an entry are
/// skipped and pixels outside every column range of their row are left untouched.
pub fn color_tile<F>(tile: &DecodedTile, metadata: &RendererMetadata, mut color_pixel: F) -> CogResult<Vec<u8>>
where
    F: FnMut(usize, &mut [u8]),
{
    let width = tile.width();
    let mut rgba = vec![0u8; tile.pixel_count() * 4];

    let Some(mask_rows) = metadata.mask_rows.as_deref() else {
        for (index, pixel) in rgba.chunks_exact_mut(4).enumerate() {
            color_pixel(index, pixel);
        }
        return Ok(rgba);
    };

    let window = metadata.raster.zoom_window(metadata.tile.z)?;
    let tile_size = metadata.tile_size as i64;
    let row_offset = i64::from(metadata.tile.y - window.y) * tile_size;
    let column_offset = i64::from(metadata.tile.x - window.x) * tile_size;

    for row in 0..tile.height() {
        let Some(ranges) = mask_rows.row(row_offset + row as i64) else {
            continue;
        };
        for column in 0..width {
            if MaskRows::contains(ranges, column_offset + column as i64) {
                let index = row * width + column;
                color_pixel(index, &mut rgba[index * 4..index * 4 + 4]);
            }
        }
    }
    Ok(rgba)
}

/// Convert to a byte the way a clamped 8-bit canvas buffer does: NaN becomes 0, values are
/// clamped to `[0, 255]` and rounded half to even.
#[inline]
#[must_use]
pub fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 255.0).round_ties_even() as u8
    }
}
