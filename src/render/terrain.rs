//! Terrain-RGB elevation encoding.
//!
//! `height = -10000 + (R * 65536 + G * 256 + B) * 0.1`, with no-data and fill pixels encoded as
//! sea level.

use super::{RendererMetadata, TileRenderer, clamp_u8, color_tile};
use crate::error::CogResult;
use crate::raster::DecodedTile;

#[derive(Debug, Default, Clone, Copy)]
pub struct TerrainRenderer;

impl TileRenderer for TerrainRenderer {
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>> {
        let raster = &metadata.raster;
        color_tile(tile, metadata, |index, rgba| {
            let px = raster.scaled(tile.value(0, index));
            let height = if tile.is_fill(index) || raster.no_data == Some(px) {
                0.0
            } else {
                px
            };
            rgba.copy_from_slice(&encode_height(height));
        })
    }
}

/// Encode `height` in meters, 0.1 m precision.
#[must_use]
pub fn encode_height(height: f64) -> [u8; 4] {
    let value = (height + 10_000.0) / 0.1;
    [
        clamp_u8((value / 65_536.0).floor() % 256.0),
        clamp_u8((value / 256.0).floor() % 256.0),
        clamp_u8(value % 256.0),
        255,
    ]
}

/// Inverse of [`encode_height`].
#[must_use]
pub fn decode_height(rgba: [u8; 4]) -> f64 {
    let [r, g, b, _] = rgba.map(f64::from);
    -10_000.0 + (r * 65_536.0 + g * 256.0 + b) * 0.1
}
