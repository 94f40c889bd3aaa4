//! XYZ tile coordinate math.
//!
//! Tiles follow the Web Mercator (EPSG:3857) XYZ scheme: origin at the top-left corner of the
//! world, `y` increasing downward. Every conversion floors toward the lower-indexed tile so a
//! point sampled exactly on a tile edge lands in the tile that renders it.
//!
//! ```rust
//! use cogtile::xyz_tile::{geographic_point_to_tile_pixel, TileIndex};
//!
//! let pixel = geographic_point_to_tile_pixel(41.3874, 2.1686, 1);
//! assert_eq!(pixel.tile, TileIndex::new(1, 1, 0));
//! assert_eq!((pixel.column, pixel.row), (3, 191));
//! ```

use crate::error::{CogError, CogResult};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{HALF_EARTH, lon_lat_to_mercator, mercator_to_lon_lat};

/// Default tile edge in pixels.
pub const TILE_SIZE: usize = 256;

/// Full Web Mercator world width in meters.
pub const MAX_EXTENT: f64 = 2.0 * HALF_EARTH;

/// Deepest zoom a [`TileIndex`] may address.
pub const MAX_ZOOM: i32 = 30;

/// Address of a single XYZ tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    pub z: i32,
    pub x: i32,
    pub y: i32,
}

impl TileIndex {
    #[must_use]
    pub fn new(z: i32, x: i32, y: i32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom.
    #[must_use]
    pub fn tiles_per_axis(z: i32) -> i64 {
        1_i64 << z.clamp(0, MAX_ZOOM)
    }

    /// Reject indices outside `0 <= x, y < 2^z`.
    pub fn validate(&self) -> CogResult<()> {
        if !(0..=MAX_ZOOM).contains(&self.z) {
            return Err(CogError::InvalidRequest(format!("zoom {} out of range", self.z)));
        }
        let n = Self::tiles_per_axis(self.z);
        if self.x < 0 || self.y < 0 || i64::from(self.x) >= n || i64::from(self.y) >= n {
            return Err(CogError::InvalidRequest(format!(
                "tile {}/{}/{} outside the {n}x{n} grid",
                self.z, self.x, self.y
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A tile plus the pixel inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePixel {
    pub tile: TileIndex,
    pub row: usize,
    pub column: usize,
}

/// Inclusive range of tile indices at one zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl TileBounds {
    #[must_use]
    pub fn columns(&self) -> usize {
        (self.max_x - self.min_x + 1).max(0) as usize
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        (self.max_y - self.min_y + 1).max(0) as usize
    }
}

/// Web Mercator bounding box of an XYZ tile.
#[must_use]
pub fn tile_index_to_mercator_bbox(tile: TileIndex) -> BoundingBox {
    let n = TileIndex::tiles_per_axis(tile.z) as f64;
    let tile_size = MAX_EXTENT / n;

    let minx = -HALF_EARTH + f64::from(tile.x) * tile_size;
    let maxx = minx + tile_size;
    let maxy = HALF_EARTH - f64::from(tile.y) * tile_size;
    let miny = maxy - tile_size;

    BoundingBox::new(minx, miny, maxx, maxy)
}

/// Inverse-project the two corners of a mercator box to degrees.
#[must_use]
pub fn mercator_bbox_to_geographic_bbox(bbox: &BoundingBox) -> BoundingBox {
    let (minx, miny) = mercator_to_lon_lat(bbox.minx, bbox.miny);
    let (maxx, maxy) = mercator_to_lon_lat(bbox.maxx, bbox.maxy);
    BoundingBox::new(minx, miny, maxx, maxy)
}

/// Fractional zoom whose 256px tiles have the given pixel size in meters.
#[must_use]
pub fn zoom_from_resolution(resolution: f64) -> f64 {
    (MAX_EXTENT / (TILE_SIZE as f64 * resolution)).log2()
}

/// Tile and in-tile pixel containing a lon/lat point, using [`TILE_SIZE`] tiles.
#[must_use]
pub fn geographic_point_to_tile_pixel(lat: f64, lon: f64, zoom: i32) -> TilePixel {
    geographic_point_to_tile_pixel_sized(lat, lon, zoom, TILE_SIZE)
}

/// Tile and in-tile pixel containing a lon/lat point for an arbitrary tile size.
///
/// Points on the far east edge or the south pole are pulled back into the last tile.
#[must_use]
pub fn geographic_point_to_tile_pixel_sized(lat: f64, lon: f64, zoom: i32, tile_size: usize) -> TilePixel {
    let (mx, my) = lon_lat_to_mercator(lon, lat);
    let size = tile_size as f64;
    let world = size * TileIndex::tiles_per_axis(zoom) as f64;
    let last = world - 1e-3;

    let pixel_x = ((mx + HALF_EARTH) / MAX_EXTENT * world).clamp(0.0, last);
    let pixel_y = (-(my - HALF_EARTH) / MAX_EXTENT * world).clamp(0.0, last);

    TilePixel {
        tile: TileIndex::new(zoom, (pixel_x / size).floor() as i32, (pixel_y / size).floor() as i32),
        row: (pixel_y % size).floor() as usize,
        column: (pixel_x % size).floor() as usize,
    }
}

/// Range of tiles covering a Web Mercator footprint at `zoom`.
///
/// Footprint edges are snapped to whole pixels first; an edge lying exactly on a tile
/// boundary does not pull in the neighbouring tile. Indices are clamped to the world grid,
/// a footprint crossing the antimeridian is clipped, not wrapped.
#[must_use]
pub fn raster_bbox_to_tile_bounds(bbox: &BoundingBox, zoom: i32) -> TileBounds {
    let size = TILE_SIZE as f64;
    let n = TileIndex::tiles_per_axis(zoom);
    let world = size * n as f64;

    let to_px = |mx: f64| ((mx + HALF_EARTH) / MAX_EXTENT * world).round().clamp(0.0, world);
    let to_py = |my: f64| ((HALF_EARTH - my) / MAX_EXTENT * world).round().clamp(0.0, world);

    let (ll_x, ll_y) = (to_px(bbox.minx), to_py(bbox.miny));
    let (ur_x, ur_y) = (to_px(bbox.maxx), to_py(bbox.maxy));

    let xs = [(ll_x / size).floor(), ((ur_x - 1.0) / size).floor()];
    let ys = [(ur_y / size).floor(), ((ll_y - 1.0) / size).floor()];

    let last = (n - 1) as f64;
    let min_x = xs[0].min(xs[1]).clamp(0.0, last) as i32;
    let min_y = ys[0].min(ys[1]).clamp(0.0, last) as i32;
    let max_x = (xs[0].max(xs[1]).clamp(0.0, last) as i32).max(min_x);
    let max_y = (ys[0].max(ys[1]).clamp(0.0, last) as i32).max(min_y);

    TileBounds { min_x, min_y, max_x, max_y }
}

/// Web Mercator box spanned by an inclusive tile range.
#[must_use]
pub fn tile_bounds_to_mercator_bbox(bounds: &TileBounds, zoom: i32) -> BoundingBox {
    let top_left = tile_index_to_mercator_bbox(TileIndex::new(zoom, bounds.min_x, bounds.min_y));
    let bottom_right = tile_index_to_mercator_bbox(TileIndex::new(zoom, bounds.max_x, bounds.max_y));
    BoundingBox::new(top_left.minx, bottom_right.miny, bottom_right.maxx, top_left.maxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::MAX_LATITUDE;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_tile_index_to_mercator_bbox() {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0));
        assert!(approx(bbox.minx, 0.0, 1e-6));
        assert!(approx(bbox.miny, 0.0, 1e-6));
        assert!(approx(bbox.maxx, 20037508.34, 0.01));
        assert!(approx(bbox.maxy, 20037508.34, 0.01));
    }

    #[test]
    fn test_world_tile() {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(0, 0, 0));
        assert_eq!(bbox.to_array(), [-HALF_EARTH, -HALF_EARTH, HALF_EARTH, HALF_EARTH]);
    }

    #[test]
    fn test_mercator_bbox_to_geographic_bbox() {
        let bbox = mercator_bbox_to_geographic_bbox(&tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0)));
        assert!(approx(bbox.minx, 0.0, 1e-9));
        assert!(approx(bbox.miny, 0.0, 1e-9));
        assert!(approx(bbox.maxx, 180.0, 1e-9));
        assert!(approx(bbox.maxy, MAX_LATITUDE, 1e-9));
    }

    #[test]
    fn test_tile_roundtrip_matches_expected_geographic_bbox() {
        for z in 0..6 {
            let n = 1 << z;
            for x in 0..n {
                for y in 0..n {
                    let geo = mercator_bbox_to_geographic_bbox(&tile_index_to_mercator_bbox(TileIndex::new(z, x, y)));
                    let width = 360.0 / f64::from(n);
                    assert!(approx(geo.minx, -180.0 + f64::from(x) * width, 1e-9));
                    assert!(approx(geo.maxx, -180.0 + f64::from(x + 1) * width, 1e-9));
                    assert!(geo.maxy > geo.miny);
                }
            }
        }
    }

    #[test]
    fn test_zoom_from_resolution() {
        let mut resolution = 0.29858214173896974;
        for expected in (13..=19).rev() {
            let zoom = zoom_from_resolution(resolution);
            assert!(approx(zoom, f64::from(expected), 1e-9), "{resolution} -> {zoom}");
            resolution *= 2.0;
        }
    }

    #[test]
    fn test_zoom_from_resolution_is_decreasing() {
        let fine = zoom_from_resolution(10.0);
        let coarse = zoom_from_resolution(20.0);
        assert!(coarse < fine);
    }

    #[test]
    fn test_point_at_origin() {
        let p = geographic_point_to_tile_pixel(0.0, 0.0, 0);
        assert_eq!(p.tile, TileIndex::new(0, 0, 0));
        assert_eq!((p.column, p.row), (128, 128));

        let p = geographic_point_to_tile_pixel(0.0, 0.0, 1);
        assert_eq!(p.tile, TileIndex::new(1, 1, 1));
        assert_eq!((p.column, p.row), (0, 0));

        let p = geographic_point_to_tile_pixel(0.0, 0.0, 18);
        assert_eq!(p.tile, TileIndex::new(18, 131072, 131072));
        assert_eq!((p.column, p.row), (0, 0));
    }

    #[test]
    fn test_point_in_barcelona() {
        let p = geographic_point_to_tile_pixel(41.3874, 2.1686, 1);
        assert_eq!(p.tile, TileIndex::new(1, 1, 0));
        assert_eq!((p.column, p.row), (3, 191));

        let p = geographic_point_to_tile_pixel(41.3874, 2.1686, 18);
        assert_eq!(p.tile, TileIndex::new(18, 132651, 97909));
        assert_eq!((p.column, p.row), (32, 184));
    }

    #[test]
    fn test_point_pixel_always_in_tile() {
        let points = [(85.0, 179.999), (-85.0, -180.0), (90.0, 180.0), (-90.0, 0.0), (12.5, -77.1)];
        for z in [0, 3, 10, 22] {
            for (lat, lon) in points {
                let p = geographic_point_to_tile_pixel(lat, lon, z);
                assert!(p.row < TILE_SIZE && p.column < TILE_SIZE);
                assert!(p.tile.validate().is_ok(), "{lat},{lon}@{z} -> {}", p.tile);
                assert_eq!(p, geographic_point_to_tile_pixel(lat, lon, z));
            }
        }
    }

    #[test]
    fn test_point_on_tile_edge_matches_tile_bbox() {
        let tile = TileIndex::new(4, 9, 5);
        let geo = mercator_bbox_to_geographic_bbox(&tile_index_to_mercator_bbox(tile));
        let p = geographic_point_to_tile_pixel(geo.maxy - 1e-9, geo.minx + 1e-9, 4);
        assert_eq!(p.tile, tile);
        assert_eq!((p.column, p.row), (0, 0));
    }

    #[test]
    fn test_raster_bbox_to_tile_bounds_world() {
        let world = BoundingBox::new(-HALF_EARTH, -HALF_EARTH, HALF_EARTH, HALF_EARTH);
        assert_eq!(raster_bbox_to_tile_bounds(&world, 0), TileBounds { min_x: 0, min_y: 0, max_x: 0, max_y: 0 });
        assert_eq!(raster_bbox_to_tile_bounds(&world, 2), TileBounds { min_x: 0, min_y: 0, max_x: 3, max_y: 3 });
    }

    #[test]
    fn test_raster_bbox_on_tile_edges() {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0));
        assert_eq!(raster_bbox_to_tile_bounds(&bbox, 1), TileBounds { min_x: 1, min_y: 0, max_x: 1, max_y: 0 });
        assert_eq!(raster_bbox_to_tile_bounds(&bbox, 2), TileBounds { min_x: 2, min_y: 0, max_x: 3, max_y: 1 });
    }

    #[test]
    fn test_raster_bbox_beyond_antimeridian_is_clamped() {
        let bbox = BoundingBox::new(HALF_EARTH * 0.5, 0.0, HALF_EARTH * 1.5, HALF_EARTH * 0.5);
        let bounds = raster_bbox_to_tile_bounds(&bbox, 2);
        assert_eq!(bounds.max_x, 3);
        assert_eq!(bounds.min_x, 3);
    }

    #[test]
    fn test_tile_bounds_to_mercator_bbox() {
        let bounds = TileBounds { min_x: 2, min_y: 0, max_x: 3, max_y: 1 };
        let bbox = tile_bounds_to_mercator_bbox(&bounds, 2);
        assert!(approx(bbox.minx, 0.0, 1e-6));
        assert!(approx(bbox.miny, 0.0, 1e-6));
        assert!(approx(bbox.maxx, HALF_EARTH, 1e-6));
        assert!(approx(bbox.maxy, HALF_EARTH, 1e-6));
        assert_eq!(bounds.columns(), 2);
        assert_eq!(bounds.rows(), 2);
    }

    #[test]
    fn test_validate() {
        assert!(TileIndex::new(2, 3, 3).validate().is_ok());
        assert!(TileIndex::new(2, 4, 0).validate().is_err());
        assert!(TileIndex::new(-1, 0, 0).validate().is_err());
        assert!(TileIndex::new(3, -1, 0).validate().is_err());
    }
}
