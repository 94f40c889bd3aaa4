//! GeoTIFF raster source built on the `tiff` decoder.
//!
//! [`TiffOpener`] opens local paths, `file://` and `http(s)://` URLs through a [`RangeReader`],
//! reads every IFD once (georeferencing, GDAL metadata, photometric tags) and serves window
//! reads by nearest-neighbour sampling of decoded chunks. Decoding runs on tokio's blocking
//! pool.
//!
//! ```rust,ignore
//! use cogtile::{RasterOpener, TiffOpener};
//!
//! let raster = TiffOpener::default().open("https://example.com/dem.tif").await?;
//! println!("{} images", raster.image_count());
//! ```

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use async_trait::async_trait;
use lru::LruCache;
use tiff::TiffError;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, trace};

use crate::error::{CogError, CogResult};
use crate::geometry::BoundingBox;
use crate::geometry::projection::TransformStrategy;
use crate::metadata::resolution_in_meters;
use crate::range_reader::{BlockCache, DEFAULT_BLOCK_CAPACITY, RangeCursor, RangeReader, create_range_reader};
use crate::raster::{
    DecodedTile, FileMetadata, ImageInfo, RasterHandle, RasterOpener, SUBFILE_MASK, SampleKind, WindowRequest,
};

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CRS: u16 = 3072;

/// Default number of decoded chunks kept per raster.
pub const DEFAULT_CHUNK_CAPACITY: usize = 64;

/// Opens GeoTIFFs by path or URL.
#[derive(Debug, Clone, Copy)]
pub struct TiffOpener {
    block_capacity: usize,
    chunk_capacity: usize,
}

impl Default for TiffOpener {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }
}

impl TiffOpener {
    /// Raw byte blocks kept per raster.
    #[must_use]
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    /// Decoded chunks kept per raster.
    #[must_use]
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }
}

#[async_trait]
impl RasterOpener for TiffOpener {
    async fn open(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>> {
        let opener = *self;
        let url = url.to_string();
        let raster = tokio::task::spawn_blocking(move || {
            let reader = create_range_reader(&url).map_err(|e| CogError::open(&url, e))?;
            TiffRaster::from_reader(reader, opener.block_capacity, opener.chunk_capacity)
        })
        .await??;
        Ok(Arc::new(raster))
    }
}

/// One IFD and how its chunks are laid out.
struct Level {
    info: ImageInfo,
    samples_per_pixel: usize,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
}

impl Level {
    fn is_mask(&self) -> bool {
        self.info.subfile_type & SUBFILE_MASK != 0
    }
}

/// An opened GeoTIFF. Cheap to clone.
#[derive(Clone)]
pub struct TiffRaster {
    inner: Arc<TiffInner>,
}

struct TiffInner {
    url: String,
    blocks: Arc<BlockCache>,
    levels: Vec<Level>,
    chunks: Mutex<LruCache<(usize, u32), Arc<Vec<f64>>>>,
}

impl TiffRaster {
    /// Read every IFD of `reader`. Blocking.
    pub fn from_reader(reader: Arc<dyn RangeReader>, block_capacity: usize, chunk_capacity: usize) -> CogResult<Self> {
        let url = reader.identifier().to_string();
        let blocks = Arc::new(BlockCache::new(reader, block_capacity));
        let mut decoder = new_decoder(&blocks).map_err(|e| tiff_error(&url, e))?;

        let mut levels: Vec<Level> = Vec::new();
        loop {
            let level = read_level(&mut decoder, levels.first()).map_err(|e| match e {
                LevelError::Tiff(e) => tiff_error(&url, e),
                LevelError::Format(message) => CogError::Format(format!("{url}: {message}")),
            })?;
            levels.push(level);
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().map_err(|e| tiff_error(&url, e))?;
        }

        let first = &levels[0].info;
        debug!(%url, images = levels.len(), width = first.width, height = first.height, epsg = ?first.epsg, "opened GeoTIFF");

        let capacity = NonZeroUsize::new(chunk_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            inner: Arc::new(TiffInner {
                url,
                blocks,
                levels,
                chunks: Mutex::new(LruCache::new(capacity)),
            }),
        })
    }
}

#[async_trait]
impl RasterHandle for TiffRaster {
    fn image_count(&self) -> usize {
        self.inner.levels.len()
    }

    fn image(&self, index: usize) -> CogResult<ImageInfo> {
        self.inner
            .levels
            .get(index)
            .map(|level| level.info.clone())
            .ok_or_else(|| CogError::Format(format!("image {index} out of range")))
    }

    async fn read_window(&self, request: &WindowRequest) -> CogResult<DecodedTile> {
        let inner = Arc::clone(&self.inner);
        let request = *request;
        tokio::task::spawn_blocking(move || inner.read_window(&request)).await?
    }
}

impl TiffInner {
    /// Coarsest non-mask level still at least as fine as `target` meters per pixel, or the
    /// finest level when every level is coarser.
    fn select_level(&self, target: f64) -> usize {
        let resolution = |level: &Level| resolution_in_meters(level.info.resolution[0], level.info.epsg);
        let candidates = || self.levels.iter().enumerate().filter(|(_, level)| !level.is_mask());

        let coarsest_fine_enough = candidates()
            .filter(|(_, level)| resolution(level) <= target * (1.0 + 1e-9))
            .max_by(|(_, a), (_, b)| resolution(a).total_cmp(&resolution(b)));
        let finest = || candidates().min_by(|(_, a), (_, b)| resolution(a).total_cmp(&resolution(b)));

        coarsest_fine_enough.or_else(finest).map_or(0, |(index, _)| index)
    }

    fn read_window(&self, request: &WindowRequest) -> CogResult<DecodedTile> {
        let target = request.bbox.width() / request.width.max(1) as f64;
        let index = self.select_level(target);
        let level = &self.levels[index];
        let info = &level.info;
        let strategy = TransformStrategy::from_mercator_to(info.epsg).map_err(CogError::Format)?;
        trace!(url = %self.url, image = index, target, "sampling GeoTIFF window");

        let [res_x, res_y] = info.resolution;
        let pixels = request.width * request.height;
        let bands = level.samples_per_pixel;
        let mut out = vec![vec![request.fill_value; pixels]; bands];
        let mut fill = vec![true; pixels];
        let mut loaded: AHashMap<u32, Arc<Vec<f64>>> = AHashMap::new();

        let step_x = request.bbox.width() / request.width as f64;
        let step_y = request.bbox.height() / request.height as f64;
        for row in 0..request.height {
            let wy = request.bbox.maxy - (row as f64 + 0.5) * step_y;
            for col in 0..request.width {
                let wx = request.bbox.minx + (col as f64 + 0.5) * step_x;
                let Ok((nx, ny)) = strategy.transform(wx, wy) else {
                    continue;
                };
                let src_col = ((nx - info.bbox.minx) / res_x).floor();
                let src_row = ((info.bbox.maxy - ny) / res_y).floor();
                if !(0.0..info.width as f64).contains(&src_col) || !(0.0..info.height as f64).contains(&src_row) {
                    continue;
                }
                let (src_col, src_row) = (src_col as usize, src_row as usize);

                let chunk_index =
                    ((src_row / level.chunk_height) * level.chunks_across + src_col / level.chunk_width) as u32;
                let chunk = match loaded.get(&chunk_index) {
                    Some(chunk) => Arc::clone(chunk),
                    None => {
                        let chunk = self.chunk(index, chunk_index)?;
                        loaded.insert(chunk_index, Arc::clone(&chunk));
                        chunk
                    }
                };

                let within = (src_row % level.chunk_height) * level.chunk_width + src_col % level.chunk_width;
                let idx = row * request.width + col;
                for (band, values) in out.iter_mut().enumerate() {
                    if let Some(&value) = chunk.get(within * bands + band) {
                        values[idx] = value;
                    }
                }
                fill[idx] = false;
            }
        }

        DecodedTile::new(request.width, request.height, out, fill)
    }

    /// Decoded chunk of image `image`, padded to the full chunk size.
    fn chunk(&self, image: usize, chunk_index: u32) -> CogResult<Arc<Vec<f64>>> {
        let key = (image, chunk_index);
        if let Some(chunk) = self.chunks.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(Arc::clone(chunk));
        }

        let level = &self.levels[image];
        let mut decoder = new_decoder(&self.blocks).map_err(|e| tiff_error(&self.url, e))?;
        decoder.seek_to_image(image).map_err(|e| tiff_error(&self.url, e))?;
        let (data_width, data_height) = decoder.chunk_data_dimensions(chunk_index);
        let (data_width, data_height) = (data_width as usize, data_height as usize);
        let values = convert_decoding_result(decoder.read_chunk(chunk_index).map_err(|e| tiff_error(&self.url, e))?);

        let spp = level.samples_per_pixel;
        if values.len() < data_width * data_height * spp {
            return Err(CogError::Format(format!(
                "decoded chunk {chunk_index} has length {} (expected {})",
                values.len(),
                data_width * data_height * spp
            )));
        }

        let mut padded = vec![f64::NAN; level.chunk_width * level.chunk_height * spp];
        for row in 0..data_height {
            let src = row * data_width * spp;
            let dst = row * level.chunk_width * spp;
            padded[dst..dst + data_width * spp].copy_from_slice(&values[src..src + data_width * spp]);
        }
        trace!(url = %self.url, image, chunk_index, "decoded chunk");

        let chunk = Arc::new(padded);
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, Arc::clone(&chunk));
        Ok(chunk)
    }
}

fn new_decoder(blocks: &Arc<BlockCache>) -> Result<Decoder<RangeCursor>, TiffError> {
    Ok(Decoder::new(RangeCursor::new(Arc::clone(blocks)))?.with_limits(Limits::unlimited()))
}

fn tiff_error(url: &str, err: TiffError) -> CogError {
    match err {
        TiffError::IoError(e) => CogError::read(url, e),
        other => CogError::Format(format!("{url}: {other}")),
    }
}

enum LevelError {
    Tiff(TiffError),
    Format(String),
}

impl From<TiffError> for LevelError {
    fn from(err: TiffError) -> Self {
        Self::Tiff(err)
    }
}

/// Read the current IFD. Overviews inherit footprint, CRS and file metadata from `base`.
fn read_level(decoder: &mut Decoder<RangeCursor>, base: Option<&Level>) -> Result<Level, LevelError> {
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err(LevelError::Format("image has no pixels".into()));
    }

    let subfile_type = decoder
        .find_tag(Tag::NewSubfileType)?
        .map(|v| v.into_u32())
        .transpose()?
        .unwrap_or(0);
    let samples_per_pixel = decoder
        .find_tag(Tag::SamplesPerPixel)?
        .map(|v| v.into_u16())
        .transpose()?
        .map_or(1, usize::from);
    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1);
    if planar == 2 && samples_per_pixel > 1 {
        return Err(LevelError::Format("planar separate multi-band images are not supported".into()));
    }

    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let (chunk_width, chunk_height) = (chunk_width.max(1) as usize, chunk_height.max(1) as usize);

    let (bbox, epsg, metadata) = match base {
        Some(base) => (base.info.bbox, base.info.epsg, base.info.metadata.clone()),
        None => {
            let bbox = read_footprint(decoder, width, height)?;
            (bbox, read_epsg(decoder)?, read_file_metadata(decoder)?)
        }
    };

    Ok(Level {
        info: ImageInfo {
            metadata,
            bbox,
            epsg,
            resolution: [bbox.width() / width as f64, bbox.height() / height as f64],
            width,
            height,
            subfile_type,
        },
        samples_per_pixel,
        chunk_width,
        chunk_height,
        chunks_across: width.div_ceil(chunk_width),
    })
}

fn read_footprint(decoder: &mut Decoder<RangeCursor>, width: usize, height: usize) -> Result<BoundingBox, LevelError> {
    let scale = f64_tag(decoder, TAG_MODEL_PIXEL_SCALE)?
        .filter(|v| v.len() >= 2)
        .ok_or_else(|| LevelError::Format("missing ModelPixelScale tag".into()))?;
    let tie = f64_tag(decoder, TAG_MODEL_TIEPOINT)?
        .filter(|v| v.len() >= 6)
        .ok_or_else(|| LevelError::Format("missing ModelTiepoint tag".into()))?;
    if scale[0] == 0.0 || scale[1] == 0.0 {
        return Err(LevelError::Format("zero pixel scale".into()));
    }

    // tiepoint maps pixel (i, j) to world (x, y)
    let minx = tie[3] - tie[0] * scale[0];
    let maxy = tie[4] + tie[1] * scale[1];
    Ok(BoundingBox::new(
        minx,
        maxy - height as f64 * scale[1],
        minx + width as f64 * scale[0],
        maxy,
    ))
}

fn read_epsg(decoder: &mut Decoder<RangeCursor>) -> Result<Option<i32>, LevelError> {
    let Some(keys) = decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))?
        .map(|v| v.into_u16_vec())
        .transpose()?
    else {
        return Ok(None);
    };
    Ok(epsg_from_geo_keys(&keys))
}

/// Header: version, revision, minor revision, key count; then `(id, location, count, value)`.
fn epsg_from_geo_keys(keys: &[u16]) -> Option<i32> {
    let count = usize::from(*keys.get(3)?);
    keys.get(4..)?
        .chunks_exact(4)
        .take(count)
        .find(|key| matches!(key[0], GEO_KEY_PROJECTED_CRS | GEO_KEY_GEOGRAPHIC_TYPE) && key[1] == 0 && key[3] > 0)
        .map(|key| i32::from(key[3]))
}

fn read_file_metadata(decoder: &mut Decoder<RangeCursor>) -> Result<FileMetadata, LevelError> {
    let gdal_metadata = string_tag(decoder, TAG_GDAL_METADATA)?;
    let no_data = string_tag(decoder, TAG_GDAL_NODATA)?.and_then(|s| s.trim_end_matches('\0').trim().parse().ok());
    let sample_format = decoder
        .find_tag(Tag::SampleFormat)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);

    Ok(FileMetadata {
        scale: gdal_metadata.as_deref().and_then(|m| extract_metadata_value(m, "SCALE")),
        offset: gdal_metadata.as_deref().and_then(|m| extract_metadata_value(m, "OFFSET")),
        no_data,
        photometric_interpretation: decoder
            .find_tag(Tag::PhotometricInterpretation)?
            .map(|v| v.into_u16())
            .transpose()?,
        bits_per_sample: decoder
            .find_tag(Tag::BitsPerSample)?
            .map(|v| v.into_u16_vec())
            .transpose()?,
        color_map: decoder.find_tag(Tag::ColorMap)?.map(|v| v.into_u16_vec()).transpose()?,
        artist: decoder.find_tag(Tag::Artist)?.map(|v| v.into_string()).transpose()?,
        sample_kind: SampleKind::from_sample_format(sample_format),
    })
}

fn f64_tag(decoder: &mut Decoder<RangeCursor>, tag: u16) -> Result<Option<Vec<f64>>, TiffError> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(tag))?
        .map(|v| v.into_f64_vec())
        .transpose()
}

fn string_tag(decoder: &mut Decoder<RangeCursor>, tag: u16) -> Result<Option<String>, TiffError> {
    decoder
        .find_tag(Tag::from_u16_exhaustive(tag))?
        .map(|v| v.into_string())
        .transpose()
}

/// Value of `<Item name="KEY" ...>value</Item>` in GDAL's XML metadata.
fn extract_metadata_value(metadata: &str, key: &str) -> Option<f64> {
    let needle = format!("name=\"{key}\"");
    let pos = metadata.find(&needle)?;
    let rest = &metadata[pos..];
    let start = rest.find('>')? + 1;
    let rest = &rest[start..];
    let end = rest.find('<')?;
    rest[..end].trim().parse().ok()
}

fn convert_decoding_result(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
        DecodingResult::F16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
    }
}
