//! Error types for the renderer
//!
//! Cancellation and incomplete data are not errors: they surface as a
//! `false` return from `paint` or as a projector that is not yet valid.
//! The variants here cover construction-time mistakes and export failures.

use thiserror::Error;

/// Errors produced by the rendering core
#[derive(Debug, Error)]
pub enum RenderError {
    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A screen scale factor outside (0, 1]
    #[error("invalid screen scale {scale} at index {index}: must be in (0, 1]")]
    InvalidScreenScale { index: usize, scale: f64 },

    /// A view was requested that does not fit into the backing storage
    #[error("image storage holds {capacity} pixels, {width}x{height} requested")]
    StorageTooSmall {
        width: u32,
        height: u32,
        capacity: usize,
    },

    /// The rendering worker pool could not be created
    #[error("failed to build rendering thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// There is no rendered frame to export
    #[error("no frame has been displayed yet")]
    NoFrame,

    /// PNG encoding failed
    #[error("png encoding failed: {0}")]
    Png(#[from] png::EncodingError),

    /// Writing an exported frame failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type RenderResult<T> = std::result::Result<T, RenderError>;
