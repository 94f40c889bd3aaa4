//! # cogtile - COG to map tiles
//!
//! Turns Cloud Optimized GeoTIFFs into Web Mercator RGBA tiles and point samples.
//!
//! ## Features
//!
//! - **Shared caches**: raster handles, derived metadata and decoded tiles in LRU caches with a
//!   max age; concurrent requests for the same key share one fetch
//! - **Range requests**: partial reads from local files, `file://` and HTTP(S) URLs
//! - **Renderers**: photometric decoding, color ramps, terrain-RGB and custom per-URL renderers
//! - **Masks**: optional lon/lat polygons restricting which pixels get rendered
//! - **Point queries**: band values at a geographic coordinate
//! - **TileJSON**: source descriptors for host maps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cogtile::{CacheConfig, CogProtocol, TiffOpener, TileRequest};
//! use std::sync::Arc;
//!
//! let protocol = CogProtocol::new(Arc::new(TiffOpener::default()), CacheConfig::from_env());
//!
//! // Render a tile as terrain-RGB
//! let request = TileRequest::parse("cog://https://example.com/dem.tif#dem/12/2087/1493")?;
//! let rgba = protocol.tile(&request).await?;
//!
//! // Sample pixel values at a geographic coordinate
//! let values = protocol.sample_location("https://example.com/dem.tif", 41.39, 2.17, None).await?;
//! ```
//!
//! ## Architecture
//!
//! - [`cog_reader`]: cached handle, metadata and tile access per URL
//! - [`tile_cache`]: LRU memo cache sharing in-flight fetches
//! - [`metadata`]: zoom range, zoom windows and TileJSON derived from a raster
//! - [`xyz_tile`]: tile index, bounding box and pixel math
//! - [`geometry`]: [`BoundingBox`] and projections
//! - [`mask`]: geographic masks and their per-zoom row ranges
//! - [`render`]: RGBA renderers and the custom renderer registry
//! - [`point_query`]: location sampling on [`CogReader`]
//! - [`protocol`]: `cog://` URL parsing and the render pipeline
//! - [`raster`]: raster source traits and the in-memory implementation
//! - [`tiff_source`]: GeoTIFF raster source
//! - [`range_reader`]: I/O abstraction for local and HTTP sources

// ============================================================================
// Public modules
// ============================================================================

pub mod cog_reader;
pub mod config;
pub mod error;
pub mod geometry;
pub mod mask;
pub mod metadata;
pub mod point_query;
pub mod protocol;
pub mod range_reader;
pub mod raster;
pub mod render;
pub mod tiff_source;
pub mod tile_cache;
pub mod xyz_tile;

// ============================================================================
// Core Types
// ============================================================================

pub use cog_reader::CogReader;
pub use config::CacheConfig;
pub use error::{CogError, CogResult, ErrorKind};
pub use metadata::{ImageLevel, RasterMetadata, TileJson, ZoomWindow};

// ============================================================================
// Protocol
// ============================================================================

pub use protocol::{
    CogProtocol,
    TileRequest,
    source_url,
};

// ============================================================================
// Point Queries
// ============================================================================

pub use point_query::LocationSample;

// ============================================================================
// Tile Math
// ============================================================================

pub use xyz_tile::{
    TILE_SIZE,
    TileBounds,
    TileIndex,
    TilePixel,
    geographic_point_to_tile_pixel,
    mercator_bbox_to_geographic_bbox,
    raster_bbox_to_tile_bounds,
    tile_bounds_to_mercator_bbox,
    tile_index_to_mercator_bbox,
    zoom_from_resolution,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::BoundingBox;
pub use geometry::projection::{
    CoordTransformer,
    project_point,
    lon_lat_to_mercator,
    mercator_to_lon_lat,
    get_proj_string,
    is_geographic_crs,
};

// ============================================================================
// Rendering
// ============================================================================

pub use render::{
    RenderMode,
    RendererMetadata,
    TileRenderer,
    render_tile,
};
pub use render::color_ramp::{
    BuiltinRamps,
    ColorRampProvider,
    ColorScale,
    RampColors,
    color_scheme_names,
    parse_hex_color,
};
pub use render::custom::{
    ColorFunctionRenderer,
    PixelRenderer,
    RendererRegistry,
};
pub use render::photometric::{Photometric, PhotometricRenderer};
pub use render::terrain::TerrainRenderer;

// ============================================================================
// Masks
// ============================================================================

pub use mask::{
    MaskEngine,
    MaskIntersector,
    MaskRows,
    ScanlineIntersector,
};

// ============================================================================
// Raster Sources
// ============================================================================

pub use raster::{
    ArrayRaster,
    DecodedTile,
    FileMetadata,
    ImageInfo,
    MemoryOpener,
    RasterHandle,
    RasterOpener,
    SampleKind,
    WindowRequest,
};
pub use tiff_source::{TiffOpener, TiffRaster};

// ============================================================================
// Range Readers (I/O Abstraction)
// ============================================================================

pub use range_reader::{
    RangeReader,
    LocalRangeReader,
    HttpRangeReader,
    MemoryRangeReader,
    create_range_reader,
};

// ============================================================================
// Caching
// ============================================================================

pub use tile_cache::{MemoCache, TileKey};
