//! Cached access to rasters by URL.
//!
//! [`CogReader`] owns the three caches that sit between a URL and its pixels:
//! opened handles, derived [`RasterMetadata`] and decoded tiles. Each cache shares in-flight
//! fetches between concurrent callers, so two simultaneous requests for the same tile trigger a
//! single window read.
//!
//! ```rust,ignore
//! use cogtile::{CogReader, CacheConfig, TiffOpener, TileIndex};
//! use std::sync::Arc;
//!
//! let reader = CogReader::new(Arc::new(TiffOpener::default()), CacheConfig::default());
//! let metadata = reader.metadata("https://example.com/dem.tif").await?;
//! let tile = reader.raw_tile("https://example.com/dem.tif", TileIndex::new(12, 2087, 1493), 256).await?;
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CogError, CogResult};
use crate::metadata::{RasterMetadata, TileJson};
use crate::raster::{DecodedTile, RasterHandle, RasterOpener, WindowRequest};
use crate::tile_cache::{MemoCache, TileKey};
use crate::xyz_tile::{TileIndex, tile_index_to_mercator_bbox};

/// Cache-backed raster access. Cloning is cheap and clones share caches.
#[derive(Clone)]
pub struct CogReader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    opener: Arc<dyn RasterOpener>,
    config: CacheConfig,
    handles: MemoCache<String, Arc<dyn RasterHandle>>,
    metadata: MemoCache<String, Arc<RasterMetadata>>,
    tiles: MemoCache<TileKey, Arc<DecodedTile>>,
}

impl CogReader {
    #[must_use]
    pub fn new(opener: Arc<dyn RasterOpener>, config: CacheConfig) -> Self {
        let inner = ReaderInner {
            handles: MemoCache::new("handles", config.handle_capacity, config.max_age),
            metadata: MemoCache::new("metadata", config.metadata_capacity, config.max_age),
            tiles: MemoCache::new("tiles", config.tile_capacity, config.max_age),
            opener,
            config,
        };
        Self { inner: Arc::new(inner) }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Opened handle for `url`.
    pub async fn handle(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>> {
        self.inner.handle(url).await
    }

    /// Metadata for `url`, derived on first request.
    pub async fn metadata(&self, url: &str) -> CogResult<Arc<RasterMetadata>> {
        self.inner.metadata(url).await
    }

    /// TileJSON for `url`, advertising tiles under `public_url`.
    pub async fn tile_json(&self, url: &str, public_url: &str) -> CogResult<TileJson> {
        Ok(self.metadata(url).await?.tile_json(public_url))
    }

    /// Decoded, unrendered pixels of one tile.
    pub async fn raw_tile(&self, url: &str, tile: TileIndex, tile_size: usize) -> CogResult<Arc<DecodedTile>> {
        tile.validate()?;
        if tile_size == 0 {
            return Err(CogError::InvalidRequest("tile size must be positive".into()));
        }

        let key = TileKey::new(url, tile_size, tile);
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        self.inner
            .tiles
            .get_or_fetch(key, move || async move {
                let handle = inner.handle(&url).await?;
                let metadata = inner.metadata(&url).await?;
                let request = WindowRequest {
                    bbox: tile_index_to_mercator_bbox(tile),
                    width: tile_size,
                    height: tile_size,
                    fill_value: metadata.sample_kind.fill_value(metadata.no_data),
                };
                debug!(%url, %tile, tile_size, "reading raster window");
                let decoded = handle.read_window(&request).await?;
                Ok(Arc::new(decoded))
            })
            .await
    }

    /// Drop every cached handle, metadata entry and tile.
    pub fn clear(&self) {
        self.inner.handles.clear();
        self.inner.metadata.clear();
        self.inner.tiles.clear();
    }

    /// Number of cached `(handles, metadata, tiles)` entries.
    #[must_use]
    pub fn cache_sizes(&self) -> (usize, usize, usize) {
        (
            self.inner.handles.len(),
            self.inner.metadata.len(),
            self.inner.tiles.len(),
        )
    }
}

impl ReaderInner {
    async fn handle(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>> {
        let opener = Arc::clone(&self.opener);
        let owned = url.to_string();
        self.handles
            .get_or_fetch(url.to_string(), move || async move {
                debug!(url = %owned, "opening raster");
                opener.open(&owned).await
            })
            .await
    }

    async fn metadata(self: &Arc<Self>, url: &str) -> CogResult<Arc<RasterMetadata>> {
        let inner = Arc::clone(self);
        let owned = url.to_string();
        self.metadata
            .get_or_fetch(url.to_string(), move || async move {
                let handle = inner.handle(&owned).await?;
                RasterMetadata::from_handle(handle.as_ref(), inner.config.tile_size).map(Arc::new)
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::raster::{ArrayRaster, FileMetadata, ImageInfo, SampleKind};
    use async_trait::async_trait;
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Opener that counts opens and window reads, sleeping to widen race windows.
    pub(crate) struct CountingOpener {
        pub raster: Arc<ArrayRaster>,
        pub opens: AtomicUsize,
        pub reads: Arc<AtomicUsize>,
        pub fail_first_open: AtomicUsize,
    }

    struct CountingHandle {
        raster: Arc<ArrayRaster>,
        reads: Arc<AtomicUsize>,
    }

    impl CountingOpener {
        pub(crate) fn new(raster: ArrayRaster) -> Self {
            Self {
                raster: Arc::new(raster),
                opens: AtomicUsize::new(0),
                reads: Arc::new(AtomicUsize::new(0)),
                fail_first_open: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RasterOpener for CountingOpener {
        async fn open(&self, url: &str) -> CogResult<Arc<dyn RasterHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail_first_open.swap(0, Ordering::SeqCst) > 0 {
                return Err(CogError::open(url, "connection reset"));
            }
            Ok(Arc::new(CountingHandle {
                raster: Arc::clone(&self.raster),
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    #[async_trait]
    impl RasterHandle for CountingHandle {
        fn image_count(&self) -> usize {
            self.raster.image_count()
        }

        fn image(&self, index: usize) -> CogResult<ImageInfo> {
            self.raster.image(index)
        }

        async fn read_window(&self, request: &WindowRequest) -> CogResult<DecodedTile> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.raster.read_window(request).await
        }
    }

    /// Float raster covering tile 1/1/0 with values equal to the pixel row.
    pub(crate) fn sample_raster(metadata: FileMetadata) -> ArrayRaster {
        let bbox = tile_index_to_mercator_bbox(TileIndex::new(1, 1, 0));
        let data = Array3::from_shape_fn((1, 256, 256), |(_, row, _)| row as f64);
        ArrayRaster::new(data, bbox, metadata).with_overview(Array3::zeros((1, 128, 128)))
    }

    fn reader_for(opener: Arc<CountingOpener>) -> CogReader {
        CogReader::new(opener, CacheConfig::default())
    }

    #[tokio::test]
    async fn test_concurrent_metadata_requests_open_once() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = reader_for(Arc::clone(&opener));

        let (a, b) = tokio::join!(reader.metadata("mem://a"), reader.metadata("mem://a"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_tile_requests_read_once() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = reader_for(Arc::clone(&opener));
        let tile = TileIndex::new(1, 1, 0);

        let (a, b) = tokio::join!(
            reader.raw_tile("mem://a", tile, 256),
            reader.raw_tile("mem://a", tile, 256)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opener.reads.load(Ordering::SeqCst), 1);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        assert_eq!(a.value(0, 0), 0.0);
        assert_eq!(a.value(0, 256 * 10), 10.0);
    }

    #[tokio::test]
    async fn test_tile_size_is_part_of_the_key() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = reader_for(Arc::clone(&opener));
        let tile = TileIndex::new(1, 1, 0);

        let small = reader.raw_tile("mem://a", tile, 128).await.unwrap();
        let large = reader.raw_tile("mem://a", tile, 256).await.unwrap();
        assert_eq!(small.pixel_count(), 128 * 128);
        assert_eq!(large.pixel_count(), 256 * 256);
        assert_eq!(opener.reads.load(Ordering::SeqCst), 2);
        assert_eq!(reader.cache_sizes(), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_fill_sentinel_for_float_rasters_without_no_data() {
        let metadata = FileMetadata {
            sample_kind: SampleKind::Float,
            ..FileMetadata::default()
        };
        let opener = Arc::new(CountingOpener::new(sample_raster(metadata)));
        let reader = reader_for(opener);

        let tile = reader.raw_tile("mem://a", TileIndex::new(1, 0, 0), 4).await.unwrap();
        assert!((0..16).all(|i| tile.is_fill(i)));
        assert_eq!(tile.value(0, 0), f64::INFINITY);
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        opener.fail_first_open.store(1, Ordering::SeqCst);
        let reader = reader_for(Arc::clone(&opener));

        let err = reader.metadata("mem://a").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
        assert_eq!(reader.cache_sizes(), (0, 0, 0));

        assert!(reader.metadata("mem://a").await.is_ok());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_metadata_does_not_reopen() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = CogReader::new(
            Arc::clone(&opener) as Arc<dyn RasterOpener>,
            CacheConfig::default().with_handle_capacity(1),
        );

        reader.metadata("mem://a").await.unwrap();
        reader.metadata("mem://b").await.unwrap();
        // handle for a is evicted, its metadata is not
        reader.metadata("mem://a").await.unwrap();
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(reader.cache_sizes().1, 2);
    }

    #[tokio::test]
    async fn test_zoom_windows_use_configured_tile_size() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = CogReader::new(opener, CacheConfig::default().with_tile_size(512));
        let metadata = reader.metadata("mem://a").await.unwrap();
        assert_eq!(metadata.zoom_window(1).unwrap().raster_width, 512);
    }

    #[tokio::test]
    async fn test_invalid_tile_index() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = reader_for(opener);
        let err = reader.raw_tile("mem://a", TileIndex::new(1, 2, 0), 256).await.unwrap_err();
        assert!(matches!(err, CogError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_tile_json() {
        let opener = Arc::new(CountingOpener::new(sample_raster(FileMetadata::default())));
        let reader = reader_for(opener);
        let tile_json = reader.tile_json("mem://a", "cog://mem://a").await.unwrap();
        assert_eq!(tile_json.tiles[0], "cog://mem://a/{z}/{x}/{y}");
        let bounds = BoundingBox::from(tile_json.bounds.unwrap());
        assert!((bounds.maxx - 180.0).abs() < 1e-9);
    }
}
