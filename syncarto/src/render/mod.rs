//! Sample scaling and the per-scene processing pipeline.
//!
//! ```text
//! RasterWindow ──► ChannelInput ──► 8-bit RGB + alpha ──► Pipeline LUTs ──► RgbaImage
//!                  (precomposed / scaled / composed)
//! ```

mod engine;
mod operation;
mod scaler;

pub use engine::{quantize, render_data, ChannelInput, ChannelTables};
pub use operation::{
    gamma, sigmoidal, Channel, ChannelSet, Operation, Pipeline, PipelineParseError,
    MIN_SIGMOIDAL_BIAS,
};
pub use scaler::{
    scale_green, scale_multiband, scale_red, ScaleRange, ScaledBands, DEFAULT_SCALE_MAX,
    DEFAULT_SCALE_MIN,
};

/// Errors composing channels into an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("{channel} channel has {actual} samples, expected {expected}")]
    LengthMismatch {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("decoded window has no band for sample {0}")]
    MissingBand(usize),
}
