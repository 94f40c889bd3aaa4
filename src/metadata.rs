//! Raster-level metadata derived once per URL from an opened handle.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{CogError, CogResult};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{EPSG_WEB_MERCATOR, EARTH_RADIUS, bbox_to_mercator, is_geographic_crs};
use crate::raster::{RasterHandle, SUBFILE_MASK, SUBFILE_REDUCED_RESOLUTION, SampleKind};
use crate::xyz_tile::{
    TileBounds, mercator_bbox_to_geographic_bbox, raster_bbox_to_tile_bounds,
    tile_bounds_to_mercator_bbox, zoom_from_resolution,
};

/// Meters per degree of longitude at the equator.
const METERS_PER_DEGREE: f64 = EARTH_RADIUS * std::f64::consts::PI / 180.0;

/// One resolution level of the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageLevel {
    pub zoom: f64,
    pub is_overview: bool,
    pub is_mask: bool,
}

/// The tiled footprint of the raster at one zoom.
///
/// `bbox` is in Web Mercator meters and spans whole tiles, so `raster_width`/`raster_height`
/// are multiples of the tile size the metadata was derived for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomWindow {
    pub z: i32,
    pub x: i32,
    pub y: i32,
    pub bbox: BoundingBox,
    pub raster_width: usize,
    pub raster_height: usize,
}

impl ZoomWindow {
    fn from_bounds(z: i32, bounds: &TileBounds, tile_size: usize) -> Self {
        Self {
            z,
            x: bounds.min_x,
            y: bounds.min_y,
            bbox: tile_bounds_to_mercator_bbox(bounds, z),
            raster_width: bounds.columns() * tile_size,
            raster_height: bounds.rows() * tile_size,
        }
    }
}

/// Everything the renderers and the sampler need to know about a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub offset: f64,
    pub scale: f64,
    pub no_data: Option<f64>,
    pub photometric_interpretation: Option<u16>,
    pub bits_per_sample: Option<Vec<u16>>,
    pub color_map: Option<Vec<u16>>,
    pub attribution: Option<String>,
    pub geographic_bbox: Option<BoundingBox>,
    pub images: Vec<ImageLevel>,
    pub min_zoom: i32,
    pub max_zoom: i32,
    pub zoom_level_metadata: BTreeMap<i32, ZoomWindow>,
    pub sample_kind: SampleKind,
}

impl RasterMetadata {
    /// Derive metadata from every resolution level of `handle`, with zoom windows measured in
    /// tiles of `tile_size` pixels.
    pub fn from_handle(handle: &dyn RasterHandle, tile_size: usize) -> CogResult<Self> {
        let count = handle.image_count();
        if count == 0 {
            return Err(CogError::Format("raster has no images".into()));
        }

        let first = handle.image(0)?;
        let native_epsg = first.epsg.unwrap_or(EPSG_WEB_MERCATOR);
        let mercator_bbox = bbox_to_mercator(native_epsg, &first.bbox).map_err(CogError::Format)?;

        let mut images = Vec::with_capacity(count);
        for index in 0..count {
            let image = handle.image(index)?;
            let resolution = resolution_in_meters(image.resolution[0], image.epsg);
            images.push(ImageLevel {
                zoom: zoom_from_resolution(resolution),
                is_overview: image.subfile_type & SUBFILE_REDUCED_RESOLUTION != 0,
                is_mask: image.subfile_type & SUBFILE_MASK != 0,
            });
        }

        let zooms = images.iter().filter(|image| image.zoom.is_finite()).map(|image| image.zoom);
        let (min, max) = zooms.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), z| (lo.min(z), hi.max(z)));
        if !min.is_finite() || !max.is_finite() {
            return Err(CogError::Format("raster resolution does not map to a zoom level".into()));
        }
        let min_zoom = (min.round() as i32).max(0);
        let max_zoom = (max.round() as i32).max(min_zoom);

        let zoom_level_metadata = (min_zoom..=max_zoom)
            .map(|z| (z, ZoomWindow::from_bounds(z, &raster_bbox_to_tile_bounds(&mercator_bbox, z), tile_size)))
            .collect();

        let file = first.metadata;
        debug!(min_zoom, max_zoom, levels = count, "derived raster metadata");

        Ok(Self {
            offset: file.offset.unwrap_or(0.0),
            scale: file.scale.unwrap_or(1.0),
            no_data: file.no_data,
            photometric_interpretation: file.photometric_interpretation,
            bits_per_sample: file.bits_per_sample,
            color_map: file.color_map,
            attribution: file.artist,
            geographic_bbox: Some(mercator_bbox_to_geographic_bbox(&mercator_bbox)),
            images,
            min_zoom,
            max_zoom,
            zoom_level_metadata,
            sample_kind: file.sample_kind,
        })
    }

    /// Zoom window at `zoom`; a missing window means the caller asked for a zoom this
    /// raster never computed.
    pub fn zoom_window(&self, zoom: i32) -> CogResult<&ZoomWindow> {
        self.zoom_level_metadata
            .get(&zoom)
            .ok_or(CogError::MissingZoomMetadata(zoom))
    }

    /// Round and clamp a requested zoom into `[min_zoom, max_zoom]`; `None` means `max_zoom`.
    #[must_use]
    pub fn clamp_zoom(&self, zoom: Option<f64>) -> i32 {
        match zoom {
            Some(z) if z.is_finite() => (z.round() as i32).clamp(self.min_zoom, self.max_zoom),
            _ => self.max_zoom,
        }
    }

    /// `offset + raw * scale`.
    #[inline]
    #[must_use]
    pub fn scaled(&self, raw: f64) -> f64 {
        self.offset + raw * self.scale
    }

    /// True when a scaled value is no-data, NaN or the infinite fill sentinel.
    #[inline]
    #[must_use]
    pub fn is_missing(&self, value: f64) -> bool {
        Some(value) == self.no_data || !value.is_finite()
    }

    #[must_use]
    pub fn tile_json(&self, public_url: &str) -> TileJson {
        TileJson {
            tilejson: TILEJSON_VERSION.to_string(),
            tiles: vec![format!("{}/{{z}}/{{x}}/{{y}}", public_url.trim_end_matches('/'))],
            attribution: self.attribution.clone(),
            minzoom: self.min_zoom,
            maxzoom: self.max_zoom,
            bounds: self.geographic_bbox.map(|bbox| bbox.to_array()),
        }
    }
}

const TILEJSON_VERSION: &str = "2.2.0";

/// TileJSON descriptor of a raster source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileJson {
    pub tilejson: String,
    pub tiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    pub minzoom: i32,
    pub maxzoom: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
}

pub(crate) fn resolution_in_meters(resolution: f64, epsg: Option<i32>) -> f64 {
    match epsg {
        Some(code) if is_geographic_crs(code) => resolution.abs() * METERS_PER_DEGREE,
        _ => resolution.abs(),
    }
}
