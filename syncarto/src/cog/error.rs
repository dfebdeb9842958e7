//! Error types for COG access and decoding.

use thiserror::Error;

/// Errors raised while opening, reading or decoding a COG.
///
/// Payloads are strings so one failure can be cloned to every caller waiting
/// on the same coalesced decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CogError {
    /// HTTP request failed or returned an unexpected status
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    /// Resource size could not be determined
    #[error("cannot determine size of {0}")]
    UnknownLength(String),

    /// Byte range lies outside the resource
    #[error("range {offset}+{length} is outside {url} ({size} bytes)")]
    RangeOutOfBounds {
        url: String,
        offset: u64,
        length: u64,
        size: u64,
    },

    /// The TIFF decoder rejected the data
    #[error("TIFF error: {0}")]
    Tiff(String),

    /// Valid TIFF, but a layout this crate does not decode
    #[error("unsupported image layout: {0}")]
    Unsupported(String),

    /// Requested zoom has no pyramid level
    #[error("zoom {z} is outside the pyramid ({levels} levels)")]
    InvalidZoom { z: u8, levels: usize },

    /// Requested level index does not exist
    #[error("pyramid level {level} does not exist ({levels} levels)")]
    InvalidLevel { level: usize, levels: usize },

    /// Requested sample does not exist
    #[error("sample {sample} does not exist ({samples_per_pixel} samples per pixel)")]
    InvalidSample {
        sample: usize,
        samples_per_pixel: usize,
    },

    /// The first image carries no georeferencing tags
    #[error("image has no georeference (ModelPixelScale/ModelTiepoint)")]
    MissingGeoreference,

    /// Background decode task panicked or was aborted
    #[error("decode task failed: {0}")]
    Task(String),
}

impl From<tiff::TiffError> for CogError {
    fn from(e: tiff::TiffError) -> Self {
        CogError::Tiff(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CogError {
    fn from(e: tokio::task::JoinError) -> Self {
        CogError::Task(e.to_string())
    }
}

impl From<CogError> for std::io::Error {
    fn from(e: CogError) -> Self {
        std::io::Error::other(e)
    }
}
