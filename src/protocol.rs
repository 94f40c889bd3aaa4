//! `cog://` request handling: URL parsing, renderer selection and the full
//! fetch → mask → render pipeline.
//!
//! ```rust,ignore
//! let protocol = CogProtocol::new(Arc::new(TiffOpener::default()), CacheConfig::from_env());
//! let request = TileRequest::parse("cog://https://example.com/dem.tif#dem/12/2087/1493")?;
//! let rgba = protocol.tile(&request).await?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use geo_types::MultiPolygon;
use tracing::debug;

use crate::cog_reader::CogReader;
use crate::config::CacheConfig;
use crate::error::{CogError, CogResult};
use crate::mask::MaskEngine;
use crate::metadata::{RasterMetadata, TileJson};
use crate::point_query::LocationSample;
use crate::raster::{DecodedTile, RasterOpener};
use crate::render::color_ramp::{BuiltinRamps, ColorRampProvider, ColorScale};
use crate::render::custom::RendererRegistry;
use crate::render::{RenderMode, RendererMetadata, TileRenderer, render_tile};
use crate::xyz_tile::TileIndex;

pub const PROTOCOL_PREFIX: &str = "cog://";

/// A parsed `cog://<url>[#<mode>]/<z>/<x>/<y>` tile request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub url: String,
    pub tile: TileIndex,
    pub mode: RenderMode,
}

impl TileRequest {
    /// Parse a protocol URL.
    ///
    /// The mode fragment is `dem` for terrain, `color:<scale>` for a color ramp (see
    /// [`ColorScale::parse`]) and anything else, or nothing, for photometric rendering.
    pub fn parse(request: &str) -> CogResult<Self> {
        let invalid = || CogError::InvalidRequest(format!("invalid COG protocol URL {request:?}"));

        let rest = request.strip_prefix(PROTOCOL_PREFIX).ok_or_else(invalid)?;
        let mut parts = rest.rsplitn(4, '/');
        let (Some(y), Some(x), Some(z), Some(source)) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if source.is_empty() {
            return Err(invalid());
        }
        let coordinate = |s: &str| -> CogResult<i32> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse().map_err(|_| invalid())
        };
        let tile = TileIndex::new(coordinate(z)?, coordinate(x)?, coordinate(y)?);

        let (url, fragment) = source.split_once('#').unwrap_or((source, ""));
        Ok(Self {
            url: url.to_string(),
            tile,
            mode: parse_mode(fragment)?,
        })
    }
}

impl FromStr for TileRequest {
    type Err = CogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PROTOCOL_PREFIX}{}/{}", self.url, self.tile)
    }
}

fn parse_mode(fragment: &str) -> CogResult<RenderMode> {
    if fragment.starts_with("dem") {
        Ok(RenderMode::Terrain)
    } else if let Some(params) = fragment.strip_prefix("color") {
        // "color:<params>"; the separator character itself is not checked
        let params = params.get(1..).unwrap_or("");
        Ok(RenderMode::ColorRamp(ColorScale::parse(params)?))
    } else {
        Ok(RenderMode::Photometric)
    }
}

/// Source URL of a protocol URL used for TileJSON requests: prefix and fragment removed.
#[must_use]
pub fn source_url(request: &str) -> &str {
    let rest = request.strip_prefix(PROTOCOL_PREFIX).unwrap_or(request);
    rest.split_once('#').map_or(rest, |(url, _)| url)
}

/// Everything a host map needs behind a `cog://` source.
pub struct CogProtocol {
    reader: CogReader,
    masks: MaskEngine,
    renderers: RendererRegistry,
    ramps: Arc<dyn ColorRampProvider>,
}

impl CogProtocol {
    #[must_use]
    pub fn new(opener: Arc<dyn RasterOpener>, config: CacheConfig) -> Self {
        Self::from_parts(CogReader::new(opener, config), MaskEngine::default(), Arc::new(BuiltinRamps))
    }

    #[must_use]
    pub fn from_parts(reader: CogReader, masks: MaskEngine, ramps: Arc<dyn ColorRampProvider>) -> Self {
        Self {
            reader,
            masks,
            renderers: RendererRegistry::new(),
            ramps,
        }
    }

    #[must_use]
    pub fn reader(&self) -> &CogReader {
        &self.reader
    }

    #[must_use]
    pub fn renderers(&self) -> &RendererRegistry {
        &self.renderers
    }

    pub async fn metadata(&self, url: &str) -> CogResult<Arc<RasterMetadata>> {
        self.reader.metadata(url).await
    }

    /// TileJSON for a protocol URL; tiles are advertised under the URL itself.
    pub async fn tile_json(&self, request: &str) -> CogResult<TileJson> {
        self.reader.tile_json(source_url(request), request).await
    }

    pub async fn raw_tile(&self, url: &str, tile: TileIndex) -> CogResult<Arc<DecodedTile>> {
        self.reader.raw_tile(url, tile, self.reader.config().tile_size).await
    }

    /// Render a decoded tile of `url`. A custom renderer registered for `url` wins over `mode`.
    pub fn render_tile(
        &self,
        url: &str,
        decoded: &DecodedTile,
        metadata: Arc<RasterMetadata>,
        tile: TileIndex,
        mode: &RenderMode,
    ) -> CogResult<Vec<u8>> {
        let mask_rows = self.masks.mask_rows(tile.z, &metadata)?;
        let color_scale = match mode {
            RenderMode::ColorRamp(scale) => Some(scale.clone()),
            _ => None,
        };
        let renderer_metadata = RendererMetadata::new(metadata, tile, decoded.width())
            .with_mask_rows(mask_rows)
            .with_color_scale(color_scale);

        if let Some(custom) = self.renderers.get(url) {
            debug!(%url, %tile, "rendering with custom renderer");
            return custom.render(decoded, &renderer_metadata);
        }
        render_tile(decoded, &renderer_metadata, mode, &self.ramps)
    }

    /// Fetch, mask and render one tile to `tile_size * tile_size * 4` RGBA bytes.
    pub async fn tile(&self, request: &TileRequest) -> CogResult<Vec<u8>> {
        let decoded = self.raw_tile(&request.url, request.tile).await?;
        let metadata = self.metadata(&request.url).await?;
        self.render_tile(&request.url, &decoded, metadata, request.tile, &request.mode)
    }

    pub async fn sample_location(&self, url: &str, lat: f64, lon: f64, zoom: Option<f64>) -> CogResult<Vec<f64>> {
        self.reader.sample_location(url, lat, lon, zoom).await
    }

    pub async fn sample_location_detailed(
        &self,
        url: &str,
        lat: f64,
        lon: f64,
        zoom: Option<f64>,
    ) -> CogResult<LocationSample> {
        self.reader.sample_location_detailed(url, lat, lon, zoom).await
    }

    /// Replace the active mask (lon/lat polygons); `None` removes it.
    pub fn set_mask(&self, mask: Option<MultiPolygon<f64>>) {
        self.masks.set_mask(mask);
    }

    pub fn register_custom_renderer(&self, url: impl Into<String>, renderer: Arc<dyn TileRenderer>) {
        self.renderers.register(url, renderer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{ArrayRaster, FileMetadata, MemoryOpener};
    use crate::render::color_ramp::RampColors;
    use crate::render::terrain::encode_height;
    use crate::xyz_tile::tile_index_to_mercator_bbox;
    use geo_types::{LineString, Polygon};
    use ndarray::Array3;

    const URL: &str = "https://example.com/dem.tif";

    fn protocol(metadata: FileMetadata) -> CogProtocol {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0));
        let data = Array3::from_shape_fn((1, 256, 256), |(_, _, col)| col as f64);
        let raster = ArrayRaster::new(data, bbox, metadata);
        let opener = MemoryOpener::new().with_raster(URL, Arc::new(raster));
        CogProtocol::new(Arc::new(opener), CacheConfig::default())
    }

    fn gray() -> FileMetadata {
        FileMetadata {
            photometric_interpretation: Some(1),
            bits_per_sample: Some(vec![8]),
            ..FileMetadata::default()
        }
    }

    #[test]
    fn test_parse_photometric() {
        let request = TileRequest::parse("cog://https://example.com/a.tif/3/4/5").unwrap();
        assert_eq!(request.url, "https://example.com/a.tif");
        assert_eq!(request.tile, TileIndex::new(3, 4, 5));
        assert_eq!(request.mode, RenderMode::Photometric);
        assert_eq!(request.to_string(), "cog://https://example.com/a.tif/3/4/5");
    }

    #[test]
    fn test_parse_modes() {
        let request: TileRequest = "cog://https://example.com/a.tif#dem/1/0/1".parse().unwrap();
        assert_eq!(request.url, "https://example.com/a.tif");
        assert_eq!(request.mode, RenderMode::Terrain);

        let request = TileRequest::parse("cog://a.tif#color:viridis,0,100,c/0/0/0").unwrap();
        assert_eq!(
            request.mode,
            RenderMode::ColorRamp(ColorScale::named("viridis", 0.0, 100.0).with_continuous(true))
        );

        let request = TileRequest::parse(r##"cog://a.tif#color:["#ff0000","#0000ff"],-1,1,-/2/1/1"##).unwrap();
        let RenderMode::ColorRamp(scale) = request.mode else {
            panic!("expected a color ramp");
        };
        assert_eq!(scale.colors, RampColors::Custom(vec![[255, 0, 0], [0, 0, 255]]));
        assert!(scale.reverse);

        let request = TileRequest::parse("cog://a.tif#whatever/2/1/1").unwrap();
        assert_eq!(request.mode, RenderMode::Photometric);
    }

    #[test]
    fn test_parse_errors() {
        for url in ["https://a.tif/1/0/0", "cog://a.tif/1/0", "cog://a.tif/1/x/0", "cog:///1/0/0", "cog://a.tif/1/-1/0"] {
            let err = TileRequest::parse(url).unwrap_err();
            assert!(matches!(err, CogError::InvalidRequest(_)), "{url}");
        }
        let err = TileRequest::parse("cog://a.tif#color/1/0/0").unwrap_err();
        assert!(matches!(err, CogError::Configuration(_)));
    }

    #[test]
    fn test_source_url() {
        assert_eq!(source_url("cog://https://example.com/a.tif#dem"), "https://example.com/a.tif");
        assert_eq!(source_url("cog://a.tif"), "a.tif");
    }

    #[tokio::test]
    async fn test_photometric_tile() {
        let protocol = protocol(gray());
        let request = TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap();
        let rgba = protocol.tile(&request).await.unwrap();
        assert_eq!(rgba.len(), 256 * 256 * 4);
        // column 128: 128 / 256 * 255
        assert_eq!(&rgba[128 * 4..128 * 4 + 4], &[128, 128, 128, 255]);
    }

    #[tokio::test]
    async fn test_terrain_and_ramp_tiles() {
        let protocol = protocol(gray());

        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}#dem/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(&rgba[4 * 10..4 * 11], &encode_height(10.0));

        let rgba = protocol
            .tile(&TileRequest::parse(&format!(r##"cog://{URL}#color:["#000","#fff"],0,255,c/1/1/0"##)).unwrap())
            .await
            .unwrap();
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[255 * 4..256 * 4], &[255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn test_tile_outside_raster_is_transparent() {
        let protocol = protocol(gray());
        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/0/0")).unwrap())
            .await
            .unwrap();
        assert!(rgba.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_custom_renderer_wins() {
        let protocol = protocol(gray());
        protocol.renderers().set_color_function(URL, |px, rgba, _| {
            rgba.copy_from_slice(&[px[0] as u8, 0, 0, 255]);
        });

        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}#dem/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(&rgba[4 * 7..4 * 8], &[7, 0, 0, 255]);
    }

    #[tokio::test]
    async fn test_registered_renderer_overrides_photometric() {
        let protocol = protocol(gray());
        protocol.register_custom_renderer(URL, Arc::new(crate::render::terrain::TerrainRenderer));

        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(&rgba[4 * 3..4 * 4], &encode_height(3.0));

        protocol.renderers().unregister(URL);
        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(&rgba[4 * 3..4 * 4], &[3, 3, 3, 255]);
    }

    #[tokio::test]
    async fn test_mask_clears_pixels_outside() {
        let protocol = protocol(gray());
        // northern-eastern quadrant, west half of tile 1/1/0 only
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (90.0, 0.0), (90.0, 85.0), (0.0, 85.0), (0.0, 0.0)]),
            vec![],
        );
        protocol.set_mask(Some(MultiPolygon(vec![polygon])));

        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap())
            .await
            .unwrap();
        let row = 200 * 256;
        assert_eq!(rgba[(row + 10) * 4 + 3], 255);
        assert_eq!(rgba[(row + 200) * 4 + 3], 0);

        protocol.set_mask(None);
        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(rgba[(row + 200) * 4 + 3], 255);
    }

    #[tokio::test]
    async fn test_mask_with_large_tiles() {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0));
        let data = Array3::from_shape_fn((1, 256, 256), |(_, _, col)| col as f64);
        let opener = MemoryOpener::new().with_raster(URL, Arc::new(ArrayRaster::new(data, bbox, gray())));
        let protocol = CogProtocol::new(Arc::new(opener), CacheConfig::default().with_tile_size(512));
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (90.0, 0.0), (90.0, 85.0), (0.0, 85.0), (0.0, 0.0)]),
            vec![],
        );
        protocol.set_mask(Some(MultiPolygon(vec![polygon])));

        let rgba = protocol
            .tile(&TileRequest::parse(&format!("cog://{URL}/1/1/0")).unwrap())
            .await
            .unwrap();
        assert_eq!(rgba.len(), 512 * 512 * 4);
        let alpha = |row: usize, column: usize| rgba[(row * 512 + column) * 4 + 3];
        assert_eq!(alpha(100, 200), 255);
        assert_eq!(alpha(400, 10), 255);
        assert_eq!(alpha(400, 400), 0);
    }

    #[tokio::test]
    async fn test_tile_json_and_sampling() {
        let protocol = protocol(gray());
        let tile_json = protocol.tile_json(&format!("cog://{URL}#dem")).await.unwrap();
        assert_eq!(tile_json.tiles, vec![format!("cog://{URL}#dem/{{z}}/{{x}}/{{y}}")]);
        assert_eq!((tile_json.minzoom, tile_json.maxzoom), (1, 1));

        let values = protocol.sample_location(URL, 10.0, 0.5, None).await.unwrap();
        assert_eq!(values, vec![0.0]);
    }

    #[tokio::test]
    async fn test_unknown_url_is_upstream_error() {
        let protocol = protocol(gray());
        let err = protocol
            .tile(&TileRequest::parse("cog://missing.tif/1/1/0").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
    }
}
