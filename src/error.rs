//! Error types shared by every layer of the crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type CogResult<T> = Result<T, CogError>;

/// Boxed error used by the low-level byte readers.
pub type AnyResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Coarse classification of a [`CogError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The raster cannot be rendered as stored (photometric, color map, container layout).
    Format,
    /// Caller supplied rendering parameters are malformed.
    Configuration,
    /// Opening or reading the raster failed.
    Upstream,
    /// The core was asked for state it never computed.
    Internal,
    /// Malformed tile index or protocol URL.
    InvalidRequest,
}

/// Every failure the crate surfaces.
///
/// The type is `Clone` because a single failed in-flight fetch is delivered to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CogError {
    #[error("unsupported photometric interpretation: {0:?}")]
    UnsupportedPhotometric(Option<u16>),

    #[error("color map for paletted image not found")]
    MissingColorMap,

    #[error("invalid raster format: {0}")]
    Format(String),

    #[error("invalid color scale: {0}")]
    Configuration(String),

    #[error("failed to open {url}: {message}")]
    Open { url: String, message: String },

    #[error("failed to read {url}: {message}")]
    Read { url: String, message: String },

    #[error("no zoom metadata found for zoom level {0}")]
    MissingZoomMetadata(i32),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid tile request: {0}")]
    InvalidRequest(String),
}

impl CogError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPhotometric(_) | Self::MissingColorMap | Self::Format(_) => {
                ErrorKind::Format
            }
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Open { .. } | Self::Read { .. } => ErrorKind::Upstream,
            Self::MissingZoomMetadata(_) | Self::Internal(_) => ErrorKind::Internal,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub(crate) fn open(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Open {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Read {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for CogError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task join error: {err}"))
    }
}
