//! Flag detection operators
//!
//! Each operator reads an image and ORs new flags into a mask; none of them
//! ever clears a flag.

pub mod rms;
pub mod sir;
pub mod sumthreshold;
pub mod thresholds;

pub use rms::{
    channel_rms, flag_noisy_channels, flag_noisy_timesteps, threshold_channel_rms,
    threshold_timestep_rms, RmsMode,
};
pub use sir::{scale_invariant_rank_operator, scale_invariant_rank_operator_masked};
pub use sumthreshold::{
    NoiseDistribution, SumThresholdSettings, ThresholdConfig, ThresholdOperation,
};
pub use thresholds::ThresholdSequence;
