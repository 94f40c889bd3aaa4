//! Raster source abstraction.
//!
//! The caches never decode TIFF bytes themselves; they talk to a [`RasterOpener`] that hands out
//! [`RasterHandle`]s. [`crate::tiff_source::TiffOpener`] reads real GeoTIFFs, [`MemoryOpener`]
//! serves in-memory [`ArrayRaster`]s.

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use ndarray::Array3;
use tracing::trace;

use crate::error::{CogError, CogResult};
use crate::geometry::BoundingBox;
use crate::geometry::projection::EPSG_WEB_MERCATOR;

/// `NewSubfileType` bit marking a reduced-resolution (overview) image.
pub const SUBFILE_REDUCED_RESOLUTION: u32 = 1;
/// `NewSubfileType` bit marking a transparency mask image.
pub const SUBFILE_MASK: u32 = 4;

/// Numeric family of the stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleKind {
    #[default]
    Integer,
    Float,
}

impl SampleKind {
    /// From the TIFF `SampleFormat` tag (3 = IEEE float).
    #[must_use]
    pub fn from_sample_format(format: u16) -> Self {
        if format == 3 { Self::Float } else { Self::Integer }
    }

    /// Value written into pixels the raster does not cover.
    ///
    /// The no-data value when it is set, otherwise a value real data cannot produce for
    /// floating bands (`+inf`) and `0` for integer bands.
    #[must_use]
    pub fn fill_value(self, no_data: Option<f64>) -> f64 {
        match (no_data, self) {
            (Some(value), _) if !value.is_nan() => value,
            (_, Self::Float) => f64::INFINITY,
            (_, Self::Integer) => 0.0,
        }
    }
}

/// Per-image metadata read from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub no_data: Option<f64>,
    pub photometric_interpretation: Option<u16>,
    pub bits_per_sample: Option<Vec<u16>>,
    pub color_map: Option<Vec<u16>>,
    pub artist: Option<String>,
    pub sample_kind: SampleKind,
}

/// One resolution level of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub metadata: FileMetadata,
    /// Footprint in the native CRS.
    pub bbox: BoundingBox,
    /// Native CRS, `None` when the file does not declare one (treated as EPSG:3857).
    pub epsg: Option<i32>,
    /// Pixel size in native CRS units, `[x, y]`.
    pub resolution: [f64; 2],
    pub width: usize,
    pub height: usize,
    pub subfile_type: u32,
}

/// Pixel window request in Web Mercator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowRequest {
    pub bbox: BoundingBox,
    pub width: usize,
    pub height: usize,
    pub fill_value: f64,
}

/// Decoded pixel bands of one window.
///
/// Bands are row-major and equally long. Pixels the raster does not cover hold the fill value
/// and are flagged in `fill`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    width: usize,
    height: usize,
    bands: Vec<Vec<f64>>,
    fill: Vec<bool>,
}

impl DecodedTile {
    pub fn new(width: usize, height: usize, bands: Vec<Vec<f64>>, fill: Vec<bool>) -> CogResult<Self> {
        let pixels = width * height;
        if fill.len() != pixels || bands.iter().any(|band| band.len() != pixels) {
            return Err(CogError::Format(format!(
                "decoded window of {width}x{height} has mismatched band lengths"
            )));
        }
        Ok(Self { width, height, bands, fill })
    }

    /// Tile where no pixel is flagged as fill.
    pub fn from_bands(width: usize, height: usize, bands: Vec<Vec<f64>>) -> CogResult<Self> {
        Self::new(width, height, bands, vec![false; width * height])
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    #[must_use]
    pub fn band(&self, band: usize) -> Option<&[f64]> {
        self.bands.get(band).map(Vec::as_slice)
    }

    #[must_use]
    pub fn bands(&self) -> &[Vec<f64>] {
        &self.bands
    }

    /// Raw sample, NaN when the band does not exist.
    #[inline]
    #[must_use]
    pub fn value(&self, band: usize, index: usize) -> f64 {
        self.bands
            .get(band)
            .and_then(|b| b.get(index))
            .copied()
            .unwrap_or(f64::NAN)
    }

    #[inline]
    #[must_use]
    pub fn is_fill(&self, index: usize) -> bool {
        self.fill.get(index).copied().unwrap_or(true)
    }
}

/// Opens rasters by URL.
#[async_trait]
pub trait RasterOpener: Send + Sync {
    async fn open(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>>;
}

/// An opened raster with one or more resolution levels.
#[async_trait]
pub trait RasterHandle: Send + Sync {
    fn image_count(&self) -> usize;

    fn image(&self, index: usize) -> CogResult<ImageInfo>;

    /// Resample the raster into a Web Mercator window.
    async fn read_window(&self, request: &WindowRequest) -> CogResult<DecodedTile>;
}

/// In-memory raster in Web Mercator, one `(bands, rows, cols)` array per resolution level.
///
/// Level 0 is full resolution, later levels are overviews covering the same footprint.
pub struct ArrayRaster {
    levels: Vec<Arc<Array3<f64>>>,
    bbox: BoundingBox,
    metadata: FileMetadata,
}

impl ArrayRaster {
    #[must_use]
    pub fn new(data: Array3<f64>, bbox: BoundingBox, metadata: FileMetadata) -> Self {
        Self {
            levels: vec![Arc::new(data)],
            bbox,
            metadata,
        }
    }

    #[must_use]
    pub fn with_overview(mut self, data: Array3<f64>) -> Self {
        self.levels.push(Arc::new(data));
        self
    }

    fn level_resolution(&self, level: &Array3<f64>) -> [f64; 2] {
        let (_, rows, cols) = level.dim();
        [
            self.bbox.width() / cols.max(1) as f64,
            self.bbox.height() / rows.max(1) as f64,
        ]
    }

    // Coarsest level still at least as fine as the requested pixel size.
    fn select_level(&self, target_resolution: f64) -> &Array3<f64> {
        let mut best = &self.levels[0];
        for level in &self.levels[1..] {
            let res = self.level_resolution(level)[0];
            if res <= target_resolution && res > self.level_resolution(best)[0] {
                best = level;
            }
        }
        best
    }
}

#[async_trait]
impl RasterHandle for ArrayRaster {
    fn image_count(&self) -> usize {
        self.levels.len()
    }

    fn image(&self, index: usize) -> CogResult<ImageInfo> {
        let level = self
            .levels
            .get(index)
            .ok_or_else(|| CogError::Format(format!("image {index} out of range")))?;
        let (_, height, width) = level.dim();
        Ok(ImageInfo {
            metadata: self.metadata.clone(),
            bbox: self.bbox,
            epsg: Some(EPSG_WEB_MERCATOR),
            resolution: self.level_resolution(level),
            width,
            height,
            subfile_type: if index == 0 { 0 } else { SUBFILE_REDUCED_RESOLUTION },
        })
    }

    async fn read_window(&self, request: &WindowRequest) -> CogResult<DecodedTile> {
        let target_resolution = request.bbox.width() / request.width.max(1) as f64;
        let level = self.select_level(target_resolution);
        let (bands, rows, cols) = level.dim();
        let [res_x, res_y] = self.level_resolution(level);
        trace!(bands, rows, cols, res_x, "sampling array raster window");

        let pixels = request.width * request.height;
        let mut out = vec![vec![request.fill_value; pixels]; bands];
        let mut fill = vec![true; pixels];

        let step_x = request.bbox.width() / request.width as f64;
        let step_y = request.bbox.height() / request.height as f64;
        for row in 0..request.height {
            let wy = request.bbox.maxy - (row as f64 + 0.5) * step_y;
            let src_row = ((self.bbox.maxy - wy) / res_y).floor();
            if src_row < 0.0 || src_row >= rows as f64 {
                continue;
            }
            for col in 0..request.width {
                let wx = request.bbox.minx + (col as f64 + 0.5) * step_x;
                let src_col = ((wx - self.bbox.minx) / res_x).floor();
                if src_col < 0.0 || src_col >= cols as f64 {
                    continue;
                }
                let idx = row * request.width + col;
                for (band, values) in out.iter_mut().enumerate() {
                    values[idx] = level[[band, src_row as usize, src_col as usize]];
                }
                fill[idx] = false;
            }
        }

        DecodedTile::new(request.width, request.height, out, fill)
    }
}

/// Serves registered in-memory rasters by URL.
#[derive(Default)]
pub struct MemoryOpener {
    rasters: AHashMap<String, Arc<dyn RasterHandle>>,
}

impl MemoryOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_raster(mut self, url: impl Into<String>, raster: Arc<dyn RasterHandle>) -> Self {
        self.rasters.insert(url.into(), raster);
        self
    }
}

#[async_trait]
impl RasterOpener for MemoryOpener {
    async fn open(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>> {
        self.rasters
            .get(url)
            .cloned()
            .ok_or_else(|| CogError::open(url, "no raster registered for this url"))
    }
}
