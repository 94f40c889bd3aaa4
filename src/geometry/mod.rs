//! Coordinate types shared by the tile math, masks and raster sources.

pub mod projection;

/// Axis-aligned bounding box `[minx, miny, maxx, maxy]` in a single CRS.
///
/// The CRS is implied by where the box comes from: tile math produces EPSG:3857
/// meters, [`mercator_bbox_to_geographic_bbox`](crate::xyz_tile::mercator_bbox_to_geographic_bbox)
/// produces EPSG:4326 degrees, raster images report their native CRS.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }

    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([minx, miny, maxx, maxy]: [f64; 4]) -> Self {
        Self::new(minx, miny, maxx, maxy)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        bbox.to_array()
    }
}
