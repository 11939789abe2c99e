//! Error types shared by every flagging operation.
//!
//! Configuration problems are fatal and surface before any detection work
//! starts. Numeric degeneracies (zero variance, fully flagged windows) are not
//! errors: the affected operator simply contributes no flags.

use crate::polarization::{ComplexRepresentation, Polarization};
use thiserror::Error;

/// Errors that can occur while configuring or running a flagging strategy.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Polarization {0} is not present and cannot be derived from the input")]
    UnknownPolarization(Polarization),
    #[error("Cannot convert {from} data to {to}")]
    UnsupportedConversion {
        from: ComplexRepresentation,
        to: ComplexRepresentation,
    },
    #[error("Unsupported image count {0}: expected 1, 2, 4 or 8 buffers")]
    InvalidImageCount(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Check that two shapes agree, reporting the offending pair otherwise.
pub(crate) fn ensure_shape(
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), FlagError> {
    if expected == found {
        Ok(())
    } else {
        Err(FlagError::DimensionMismatch { expected, found })
    }
}
