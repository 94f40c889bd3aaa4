//! Spherical Web Mercator math plus proj4rs-backed transforms for other native CRSs.

use std::f64::consts::PI;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::BoundingBox;

/// WGS84 semi-major axis used by the spherical Web Mercator projection.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the Web Mercator world width in meters (`EARTH_RADIUS * PI`).
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Latitude at which the square Web Mercator world is cut off.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

pub const EPSG_WGS84: i32 = 4326;
pub const EPSG_WEB_MERCATOR: i32 = 3857;

/// Longitude/latitude (EPSG:4326) to Web Mercator (EPSG:3857).
///
/// Output is clamped to the square mercator world so the poles stay finite.
#[inline]
#[must_use]
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI * 0.25 + 0.5 * lat.to_radians()).tan().ln();
    (x.clamp(-HALF_EARTH, HALF_EARTH), y.clamp(-HALF_EARTH, HALF_EARTH))
}

/// Web Mercator (EPSG:3857) to longitude/latitude (EPSG:4326).
///
/// Longitudes beyond the antimeridian are returned as-is, never wrapped.
#[inline]
#[must_use]
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (PI * 0.5 - 2.0 * (-y / EARTH_RADIUS).exp().atan()).to_degrees();
    (lon, lat)
}

/// Project a point between two EPSG codes.
///
/// 4326 and 3857 use the closed-form spherical formulas, everything else goes through
/// proj4rs with definitions from crs-definitions.
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64), String> {
    match (source_epsg, target_epsg) {
        (s, t) if s == t => Ok((x, y)),
        (EPSG_WGS84, EPSG_WEB_MERCATOR) => Ok(lon_lat_to_mercator(x, y)),
        (EPSG_WEB_MERCATOR, EPSG_WGS84) => Ok(mercator_to_lon_lat(x, y)),
        _ => CoordTransformer::new(source_epsg, target_epsg)?.transform(x, y),
    }
}

/// Project a bounding box into Web Mercator by transforming its four corners.
pub fn bbox_to_mercator(source_epsg: i32, bbox: &BoundingBox) -> Result<BoundingBox, String> {
    if source_epsg == EPSG_WEB_MERCATOR {
        return Ok(*bbox);
    }

    let corners = [
        (bbox.minx, bbox.miny),
        (bbox.minx, bbox.maxy),
        (bbox.maxx, bbox.miny),
        (bbox.maxx, bbox.maxy),
    ];
    let mut out = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        let (mx, my) = project_point(source_epsg, EPSG_WEB_MERCATOR, x, y)?;
        out.minx = out.minx.min(mx);
        out.miny = out.miny.min(my);
        out.maxx = out.maxx.max(mx);
        out.maxy = out.maxy.max(my);
    }
    Ok(out)
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg).ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == EPSG_WGS84 || (4000..5000).contains(&epsg)
    }
}

/// Reusable proj4rs transformer between two EPSG codes.
pub struct CoordTransformer {
    source_proj: Proj,
    target_proj: Proj,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, String> {
        let source_str = get_proj_string(source_epsg)
            .ok_or_else(|| format!("EPSG:{source_epsg} is not in the crs-definitions database"))?;
        let target_str = get_proj_string(target_epsg)
            .ok_or_else(|| format!("EPSG:{target_epsg} is not in the crs-definitions database"))?;

        let source_proj = Proj::from_proj_string(source_str)
            .map_err(|e| format!("Invalid source projection EPSG:{source_epsg}: {e:?}"))?;
        let target_proj = Proj::from_proj_string(target_str)
            .map_err(|e| format!("Invalid target projection EPSG:{target_epsg}: {e:?}"))?;

        Ok(Self {
            source_proj,
            target_proj,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        // proj4rs works in radians for geographic coordinates
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(&self.source_proj, &self.target_proj, &mut point)
            .map_err(|e| format!("Transform failed: {e:?}"))?;

        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

/// How Web Mercator pixel centres are mapped into a raster's native CRS.
pub enum TransformStrategy {
    /// Native CRS is already EPSG:3857
    Identity,
    /// Native CRS is EPSG:4326, closed-form inverse mercator
    FastMerc2Geo,
    /// Any other CRS
    Proj4rs(CoordTransformer),
}

impl TransformStrategy {
    /// Pick a strategy for reading a raster whose native CRS is `native_epsg`.
    pub fn from_mercator_to(native_epsg: Option<i32>) -> Result<Self, String> {
        match native_epsg {
            None | Some(EPSG_WEB_MERCATOR) => Ok(Self::Identity),
            Some(EPSG_WGS84) => Ok(Self::FastMerc2Geo),
            Some(epsg) => Ok(Self::Proj4rs(CoordTransformer::new(EPSG_WEB_MERCATOR, epsg)?)),
        }
    }

    #[inline(always)]
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        match self {
            Self::Identity => Ok((x, y)),
            Self::FastMerc2Geo => Ok(mercator_to_lon_lat(x, y)),
            Self::Proj4rs(t) => t.transform(x, y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn test_lon_lat_to_mercator_origin() {
        let (x, y) = lon_lat_to_mercator(0.0, 0.0);
        assert!(approx_eq(x, 0.0));
        assert!(approx_eq(y, 0.0));
    }

    #[test]
    fn test_mercator_corner() {
        let (x, y) = lon_lat_to_mercator(180.0, MAX_LATITUDE);
        assert!((x - HALF_EARTH).abs() < 1e-3);
        assert!((y - HALF_EARTH).abs() < 1e-3);
    }

    #[test]
    fn test_poles_are_clamped() {
        let (_, y) = lon_lat_to_mercator(0.0, 90.0);
        assert_eq!(y, HALF_EARTH);
        let (_, y) = lon_lat_to_mercator(0.0, -90.0);
        assert_eq!(y, -HALF_EARTH);
    }

    #[test]
    fn test_roundtrip_4326_3857() {
        let test_points = [
            (0.0, 0.0),
            (10.0, 51.5),
            (-122.4, 37.8),
            (139.7, 35.7),
        ];

        for (lon, lat) in test_points {
            let (x, y) = lon_lat_to_mercator(lon, lat);
            let (lon2, lat2) = mercator_to_lon_lat(x, y);
            assert!(approx_eq(lon, lon2), "lon: {} != {}", lon, lon2);
            assert!(approx_eq(lat, lat2), "lat: {} != {}", lat, lat2);
        }
    }

    #[test]
    fn test_inverse_does_not_wrap() {
        let (lon, _) = mercator_to_lon_lat(HALF_EARTH * 1.5, 0.0);
        assert!((lon - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_project_point_same_crs() {
        let (x, y) = project_point(4326, 4326, 10.0, 51.5).unwrap();
        assert!(approx_eq(x, 10.0));
        assert!(approx_eq(y, 51.5));
    }

    #[test]
    fn test_project_point_via_proj4rs() {
        let result = project_point(4326, 32633, 15.0, 52.0);
        assert!(result.is_ok(), "Should support UTM zones: {:?}", result);
        let (x, y) = result.unwrap();
        assert!(x > 400000.0 && x < 600000.0, "UTM easting: {}", x);
        assert!(y > 5000000.0 && y < 6000000.0, "UTM northing: {}", y);
    }

    #[test]
    fn test_bbox_to_mercator_from_wgs84() {
        let bbox = BoundingBox::new(0.0, 0.0, 180.0, MAX_LATITUDE);
        let merc = bbox_to_mercator(4326, &bbox).unwrap();
        assert!(approx_eq(merc.minx, 0.0));
        assert!(approx_eq(merc.miny, 0.0));
        assert!((merc.maxx - HALF_EARTH).abs() < 1e-3);
        assert!((merc.maxy - HALF_EARTH).abs() < 1e-3);
    }

    #[test]
    fn test_transform_strategy_selection() {
        assert!(matches!(TransformStrategy::from_mercator_to(None), Ok(TransformStrategy::Identity)));
        assert!(matches!(
            TransformStrategy::from_mercator_to(Some(4326)),
            Ok(TransformStrategy::FastMerc2Geo)
        ));
        assert!(matches!(
            TransformStrategy::from_mercator_to(Some(32633)),
            Ok(TransformStrategy::Proj4rs(_))
        ));
    }

    #[test]
    fn test_is_geographic_crs() {
        assert!(is_geographic_crs(4326), "4326 is geographic");
        assert!(!is_geographic_crs(3857), "3857 is projected");
        assert!(!is_geographic_crs(32633), "UTM is projected");
    }

    #[test]
    fn test_unsupported_epsg_code() {
        let result = project_point(4326, 999999, 0.0, 0.0);
        assert!(result.unwrap_err().contains("not in the crs-definitions database"));
    }
}
