//! Cache sizing and tiling configuration.
//!
//! Defaults can be overridden from the environment:
//! - `COGTILE_HANDLE_CACHE_SIZE` - opened raster handles (default 16)
//! - `COGTILE_METADATA_CACHE_SIZE` - derived raster metadata (default 16)
//! - `COGTILE_TILE_CACHE_SIZE` - decoded tiles (default 1024)
//! - `COGTILE_CACHE_MAX_AGE_SECS` - max entry age shared by all caches (default 3600)
//! - `COGTILE_TILE_SIZE` - tile edge in pixels (default 256)

use std::time::Duration;

use tracing::warn;

use crate::xyz_tile::TILE_SIZE;

pub const DEFAULT_HANDLE_CAPACITY: usize = 16;
pub const DEFAULT_METADATA_CAPACITY: usize = 16;
pub const DEFAULT_TILE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Capacities and max age for the handle, metadata and tile caches.
///
/// A single `max_age` applies to all three caches so metadata never outlives the
/// tiles derived from it, or the other way round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub handle_capacity: usize,
    pub metadata_capacity: usize,
    pub tile_capacity: usize,
    pub max_age: Duration,
    pub tile_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
            metadata_capacity: DEFAULT_METADATA_CAPACITY,
            tile_capacity: DEFAULT_TILE_CAPACITY,
            max_age: DEFAULT_MAX_AGE,
            tile_size: TILE_SIZE,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from `COGTILE_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            handle_capacity: env_usize("COGTILE_HANDLE_CACHE_SIZE")
                .unwrap_or(defaults.handle_capacity),
            metadata_capacity: env_usize("COGTILE_METADATA_CACHE_SIZE")
                .unwrap_or(defaults.metadata_capacity),
            tile_capacity: env_usize("COGTILE_TILE_CACHE_SIZE").unwrap_or(defaults.tile_capacity),
            max_age: env_usize("COGTILE_CACHE_MAX_AGE_SECS")
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.max_age),
            tile_size: env_usize("COGTILE_TILE_SIZE").unwrap_or(defaults.tile_size),
        }
    }

    #[must_use]
    pub fn with_handle_capacity(mut self, capacity: usize) -> Self {
        self.handle_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_metadata_capacity(mut self, capacity: usize) -> Self {
        self.metadata_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_tile_capacity(mut self, capacity: usize) -> Self {
        self.tile_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    parse_setting(name, &std::env::var(name).ok()?)
}

fn parse_setting(name: &str, raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "ignoring invalid cache setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.handle_capacity, 16);
        assert_eq!(config.metadata_capacity, 16);
        assert_eq!(config.tile_capacity, 1024);
        assert_eq!(config.max_age, Duration::from_secs(3600));
        assert_eq!(config.tile_size, 256);
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::default()
            .with_tile_capacity(8)
            .with_max_age(Duration::from_secs(5))
            .with_tile_size(512)
            .with_metadata_capacity(4);
        assert_eq!(config.tile_capacity, 8);
        assert_eq!(config.metadata_capacity, 4);
        assert_eq!(config.max_age, Duration::from_secs(5));
        assert_eq!(config.tile_size, 512);
        assert_eq!(config.handle_capacity, DEFAULT_HANDLE_CAPACITY);
        assert_eq!(config.with_handle_capacity(2).handle_capacity, 2);
    }

    #[test]
    fn test_unset_variable_falls_back() {
        assert_eq!(env_usize("COGTILE_TEST_UNSET_VARIABLE"), None);
    }

    #[test]
    fn test_parse_setting_rejects_garbage() {
        assert_eq!(parse_setting("COGTILE_TILE_SIZE", " 512 "), Some(512));
        assert_eq!(parse_setting("COGTILE_TILE_SIZE", "abc"), None);
        assert_eq!(parse_setting("COGTILE_TILE_SIZE", "0"), None);
        assert_eq!(parse_setting("COGTILE_TILE_SIZE", "-4"), None);
    }
}
