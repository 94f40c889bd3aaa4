//! Caller-supplied renderers, registered per raster URL.

use std::sync::{Arc, PoisonError, RwLock};

use ahash::AHashMap;
use tracing::debug;

use super::{RendererMetadata, TileRenderer, color_tile};
use crate::error::CogResult;
use crate::raster::DecodedTile;

/// Per-pixel callback receiving the scaled band values of one pixel.
///
/// Only pixels inside the active mask are visited. Pixels outside the raster are skipped and
/// stay transparent.
pub struct ColorFunctionRenderer<F> {
    color: F,
}

impl<F> ColorFunctionRenderer<F>
where
    F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync,
{
    pub fn new(color: F) -> Self {
        Self { color }
    }
}

impl<F> TileRenderer for ColorFunctionRenderer<F>
where
    F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync,
{
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>> {
        let mut px = vec![0.0; tile.band_count()];
        color_tile(tile, metadata, |index, rgba| {
            if tile.is_fill(index) {
                return;
            }
            scaled_pixel(tile, metadata, index, &mut px);
            (self.color)(&px, rgba, metadata);
        })
    }
}

/// Per-pixel callback over every pixel of the tile, ignoring the mask.
pub struct PixelRenderer<F> {
    to_color: F,
}

impl<F> PixelRenderer<F>
where
    F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync,
{
    pub fn new(to_color: F) -> Self {
        Self { to_color }
    }
}

impl<F> TileRenderer for PixelRenderer<F>
where
    F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync,
{
    fn render(&self, tile: &DecodedTile, metadata: &RendererMetadata) -> CogResult<Vec<u8>> {
        let mut px = vec![0.0; tile.band_count()];
        let mut rgba = vec![0u8; tile.pixel_count() * 4];
        for (index, pixel) in rgba.chunks_exact_mut(4).enumerate() {
            if tile.is_fill(index) {
                continue;
            }
            scaled_pixel(tile, metadata, index, &mut px);
            (self.to_color)(&px, pixel, metadata);
        }
        Ok(rgba)
    }
}

fn scaled_pixel(tile: &DecodedTile, metadata: &RendererMetadata, index: usize, px: &mut [f64]) {
    for (band, value) in px.iter_mut().enumerate() {
        *value = metadata.raster.scaled(tile.value(band, index));
    }
}

/// Custom renderers keyed by raster URL. A registered renderer takes precedence over every
/// built-in mode for its URL.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: RwLock<AHashMap<String, Arc<dyn TileRenderer>>>,
}

impl RendererRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `renderer` for `url`, replacing any previous one.
    pub fn register(&self, url: impl Into<String>, renderer: Arc<dyn TileRenderer>) {
        let url = url.into();
        debug!(%url, "registering custom renderer");
        self.renderers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, renderer);
    }

    /// Register a mask-aware [`ColorFunctionRenderer`].
    pub fn set_color_function<F>(&self, url: impl Into<String>, color: F)
    where
        F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync + 'static,
    {
        self.register(url, Arc::new(ColorFunctionRenderer::new(color)));
    }

    /// Register a [`PixelRenderer`].
    pub fn set_pixel_function<F>(&self, url: impl Into<String>, to_color: F)
    where
        F: Fn(&[f64], &mut [u8], &RendererMetadata) + Send + Sync + 'static,
    {
        self.register(url, Arc::new(PixelRenderer::new(to_color)));
    }

    pub fn unregister(&self, url: &str) -> Option<Arc<dyn TileRenderer>> {
        self.renderers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<dyn TileRenderer>> {
        self.renderers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn clear(&self) {
        self.renderers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.renderers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
