//! Geographic masks restricting which pixels get rendered.
//!
//! The active mask is a lon/lat [`MultiPolygon`]. For a raster and zoom the engine turns it into
//! [`MaskRows`]: for every pixel row of the raster's tiled footprint
//! ([`ZoomWindow`](crate::metadata::ZoomWindow)) the inclusive column ranges inside the mask.

use std::sync::{Arc, PoisonError, RwLock};

use ahash::AHashMap;
use geo_types::{Coord, MultiPolygon};
use tracing::debug;

use crate::error::{CogError, CogResult};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{EPSG_WEB_MERCATOR, EPSG_WGS84, lon_lat_to_mercator};
use crate::metadata::RasterMetadata;

/// Inclusive `[min_column, max_column]` range.
pub type ColumnRange = [usize; 2];

/// Column ranges per global pixel row. Rows past the end render nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskRows {
    rows: Vec<Vec<ColumnRange>>,
}

impl MaskRows {
    #[must_use]
    pub fn new(rows: Vec<Vec<ColumnRange>>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn row(&self, row: i64) -> Option<&[ColumnRange]> {
        usize::try_from(row)
            .ok()
            .and_then(|r| self.rows.get(r))
            .map(Vec::as_slice)
    }

    #[inline]
    #[must_use]
    pub fn contains(ranges: &[ColumnRange], column: i64) -> bool {
        column >= 0
            && ranges
                .iter()
                .any(|&[min, max]| column >= min as i64 && column <= max as i64)
    }
}

/// Computes per-row inclusion ranges of a mask over a raster footprint.
pub trait MaskIntersector: Send + Sync {
    /// `raster_bbox` is expressed in `raster_srid`, the mask in lon/lat.
    fn inside(
        &self,
        raster_bbox: &BoundingBox,
        raster_width: usize,
        raster_height: usize,
        mask: &MultiPolygon<f64>,
        raster_srid: i32,
    ) -> CogResult<MaskRows>;
}

/// Even-odd scanline fill sampled at pixel centres.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanlineIntersector;

impl MaskIntersector for ScanlineIntersector {
    fn inside(
        &self,
        raster_bbox: &BoundingBox,
        raster_width: usize,
        raster_height: usize,
        mask: &MultiPolygon<f64>,
        raster_srid: i32,
    ) -> CogResult<MaskRows> {
        let project: fn(Coord<f64>) -> (f64, f64) = match raster_srid {
            EPSG_WEB_MERCATOR => |c| lon_lat_to_mercator(c.x, c.y),
            EPSG_WGS84 => |c| (c.x, c.y),
            other => {
                return Err(CogError::Internal(format!(
                    "mask intersection does not support EPSG:{other}"
                )));
            }
        };

        let mut edges = Vec::new();
        for polygon in mask {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                let points: Vec<(f64, f64)> = ring.coords().map(|c| project(*c)).collect();
                edges.extend(points.windows(2).map(|w| (w[0], w[1])));
                if let (Some(&first), Some(&last)) = (points.first(), points.last())
                    && first != last
                {
                    edges.push((last, first));
                }
            }
        }

        let res_x = raster_bbox.width() / raster_width.max(1) as f64;
        let res_y = raster_bbox.height() / raster_height.max(1) as f64;
        let last_col = raster_width as f64 - 1.0;

        let mut rows = Vec::with_capacity(raster_height);
        let mut crossings = Vec::new();
        for row in 0..raster_height {
            let y = raster_bbox.maxy - (row as f64 + 0.5) * res_y;
            crossings.clear();
            for &((x1, y1), (x2, y2)) in &edges {
                if (y1 > y) != (y2 > y) {
                    crossings.push(x1 + (y - y1) / (y2 - y1) * (x2 - x1));
                }
            }
            crossings.sort_by(f64::total_cmp);

            let mut ranges = Vec::new();
            for pair in crossings.chunks_exact(2) {
                let start = ((pair[0] - raster_bbox.minx) / res_x - 0.5).ceil().max(0.0);
                let end = ((pair[1] - raster_bbox.minx) / res_x - 0.5).floor().min(last_col);
                if start <= end {
                    ranges.push([start as usize, end as usize]);
                }
            }
            rows.push(ranges);
        }

        Ok(MaskRows::new(rows))
    }
}

#[derive(Default)]
struct MaskState {
    mask: Option<Arc<MultiPolygon<f64>>>,
    generation: u64,
    rows_by_zoom: AHashMap<i32, Arc<MaskRows>>,
}

/// Holds the active mask and its per-zoom rows.
///
/// Replacing the mask clears every cached zoom under the same write lock, and rows computed
/// against a mask that was replaced mid-computation are thrown away and recomputed.
pub struct MaskEngine {
    intersector: Arc<dyn MaskIntersector>,
    state: RwLock<MaskState>,
}

impl Default for MaskEngine {
    fn default() -> Self {
        Self::new(Arc::new(ScanlineIntersector))
    }
}

impl MaskEngine {
    #[must_use]
    pub fn new(intersector: Arc<dyn MaskIntersector>) -> Self {
        Self {
            intersector,
            state: RwLock::new(MaskState::default()),
        }
    }

    /// Replace the active mask; `None` removes it.
    pub fn set_mask(&self, mask: Option<MultiPolygon<f64>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.mask = mask.map(Arc::new);
        state.generation += 1;
        state.rows_by_zoom.clear();
        debug!(generation = state.generation, active = state.mask.is_some(), "mask replaced");
    }

    #[must_use]
    pub fn has_mask(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .mask
            .is_some()
    }

    /// Mask rows for `zoom`, or `None` when no mask is active.
    ///
    /// Cached per zoom only; the cache assumes one raster per engine at a time.
    pub fn mask_rows(&self, zoom: i32, metadata: &RasterMetadata) -> CogResult<Option<Arc<MaskRows>>> {
        loop {
            let (mask, generation) = {
                let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
                let Some(mask) = state.mask.clone() else {
                    return Ok(None);
                };
                if let Some(rows) = state.rows_by_zoom.get(&zoom) {
                    return Ok(Some(Arc::clone(rows)));
                }
                (mask, state.generation)
            };

            let window = metadata.zoom_window(zoom)?;
            debug!(zoom, width = window.raster_width, height = window.raster_height, "computing mask rows");
            let rows = Arc::new(self.intersector.inside(
                &window.bbox,
                window.raster_width,
                window.raster_height,
                &mask,
                EPSG_WEB_MERCATOR,
            )?);

            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.generation == generation {
                let rows = state.rows_by_zoom.entry(zoom).or_insert(rows);
                return Ok(Some(Arc::clone(rows)));
            }
            debug!(zoom, "mask replaced while computing rows, retrying");
        }
    }

    #[must_use]
    pub fn cached_zooms(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rows_by_zoom
            .len()
    }
}
