//! Image and mask primitives used by the detection operators
//!
//! This module provides the array-level building blocks of the flagging
//! strategies: mask combination, robust statistics, block resampling and
//! masked Gaussian smoothing.

pub mod lowpass;
pub mod mask;
pub mod resample;
pub mod stats;

// Re-export key functionality for easier access
pub use lowpass::{gaussian_kernel_1d, LowPassFilter};
pub use mask::{flagged_count, flagged_fraction, join, join_into};
pub use resample::{enlarge, shrink};
pub use stats::{winsorized_mean_and_stddev, winsorized_mode, RobustStats};
