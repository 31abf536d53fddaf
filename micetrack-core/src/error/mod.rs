//! Error types for the measurement and reconstruction core.

use thiserror::Error;

use crate::frame::{FrameShape, SampleDepth};

/// Fatal conditions raised by the core.  None of them are retried.
#[derive(Error, Debug)]
pub enum TrackError {
    /// Frame samples are not 8 bits per channel
    #[error("unsupported sample depth {0:?}: frames must be 8 bits per channel")]
    UnsupportedDepth(SampleDepth),

    /// Frame geometry disagrees with the background reference
    #[error("frame shape {found} does not match background shape {expected}")]
    ShapeMismatch {
        expected: FrameShape,
        found: FrameShape,
    },

    /// Frame component count changed during background accumulation
    #[error("frame holds {found} pixel components but accumulation started with {expected}")]
    ComponentCount { expected: usize, found: usize },

    /// Raw buffer too small for the declared geometry
    #[error("frame buffer holds {actual} bytes but {expected} are required")]
    BufferSize { expected: usize, actual: usize },

    /// Background requested before any frame contributed to it
    #[error("no frame was accepted for background estimation")]
    EmptyBackground,

    /// Every record is undefined, so positions cannot be extrapolated
    #[error("cannot reconstruct trajectory: no frame produced a usable detection")]
    NoDefinedRecord,

    /// Every record is invalid, so orientation cannot be extrapolated
    #[error("cannot reconstruct trajectory: no valid detection to take orientation from")]
    NoValidRecord,

    /// Malformed configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Report sink failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackError {
    /// Frame depth or geometry problem.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            TrackError::UnsupportedDepth(_)
                | TrackError::ShapeMismatch { .. }
                | TrackError::ComponentCount { .. }
                | TrackError::BufferSize { .. }
                | TrackError::EmptyBackground
        )
    }

    /// Nothing left to extrapolate the trajectory from.
    pub fn is_reconstruction_error(&self) -> bool {
        matches!(self, TrackError::NoDefinedRecord | TrackError::NoValidRecord)
    }
}

/// Convenience alias for results carrying [`TrackError`].
pub type Result<T> = std::result::Result<T, TrackError>;
