//! Sampling band values at geographic coordinates.
//!
//! A location is resolved to one pixel of one cached tile at a zoom clamped into the raster's
//! zoom range, so repeated samples near each other reuse the tile cache.
//!
//! # Example
//!
//! ```rust,ignore
//! use cogtile::CogReader;
//!
//! // Sample all bands at the finest zoom
//! let values = reader.sample_location("https://example.com/dem.tif", 41.4, 2.17, None).await?;
//!
//! // Sample at zoom 8, keeping the pixel that was read
//! let sample = reader.sample_location_detailed("https://example.com/dem.tif", 41.4, 2.17, Some(8.0)).await?;
//! println!("{} valid bands at {}", sample.valid_band_count(), sample.pixel.tile);
//! ```

use futures::future::join_all;
use tracing::trace;

use crate::cog_reader::CogReader;
use crate::error::CogResult;
use crate::xyz_tile::{TilePixel, geographic_point_to_tile_pixel_sized};

/// Band values at one location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    /// `offset + raw * scale` per band; `NaN` for no-data or points outside the raster.
    pub values: Vec<f64>,

    /// Zoom the location was resolved at
    pub zoom: i32,

    /// Tile and pixel that was read
    pub pixel: TilePixel,
}

impl LocationSample {
    /// Check if any band has a valid (non-NaN) value
    #[must_use]
    pub fn has_valid_data(&self) -> bool {
        self.values.iter().any(|v| !v.is_nan())
    }

    /// Get the number of bands with valid (non-NaN) values
    #[must_use]
    pub fn valid_band_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }
}

impl CogReader {
    /// Band values at `(lat, lon)`. `zoom` is rounded and clamped into the raster's zoom
    /// range; `None` samples the finest level.
    pub async fn sample_location(&self, url: &str, lat: f64, lon: f64, zoom: Option<f64>) -> CogResult<Vec<f64>> {
        Ok(self.sample_location_detailed(url, lat, lon, zoom).await?.values)
    }

    /// Like [`sample_location`](Self::sample_location), also reporting the zoom and pixel.
    pub async fn sample_location_detailed(
        &self,
        url: &str,
        lat: f64,
        lon: f64,
        zoom: Option<f64>,
    ) -> CogResult<LocationSample> {
        let metadata = self.metadata(url).await?;
        let zoom = metadata.clamp_zoom(zoom);
        let tile_size = self.config().tile_size;
        let pixel = geographic_point_to_tile_pixel_sized(lat, lon, zoom, tile_size);

        let tile = self.raw_tile(url, pixel.tile, tile_size).await?;
        let index = pixel.row * tile.width() + pixel.column;
        trace!(%url, tile = %pixel.tile, row = pixel.row, column = pixel.column, "sampling location");

        let values = (0..tile.band_count())
            .map(|band| {
                let px = metadata.scaled(tile.value(band, index));
                if tile.is_fill(index) || metadata.is_missing(px) {
                    f64::NAN
                } else {
                    px
                }
            })
            .collect();

        Ok(LocationSample { values, zoom, pixel })
    }

    /// Sample many `(lat, lon)` locations concurrently; each location succeeds or fails on its
    /// own.
    pub async fn sample_locations(
        &self,
        url: &str,
        locations: &[(f64, f64)],
        zoom: Option<f64>,
    ) -> Vec<CogResult<LocationSample>> {
        join_all(
            locations
                .iter()
                .map(|&(lat, lon)| self.sample_location_detailed(url, lat, lon, zoom)),
        )
        .await
    }
}
