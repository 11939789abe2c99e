//! Radio-frequency interference flagging for time-frequency data.
//!
//! Observations are 2D images indexed `[[channel, time_step]]`, one per
//! polarization and complex part. A [`strategy::Strategy`] turns them into a
//! boolean mask marking contaminated samples:
//!
//! - [`detection`]: SumThreshold, RMS thresholding and the scale-invariant rank
//!   operator
//! - [`image_proc`]: mask combination, robust statistics, resampling and
//!   masked smoothing
//! - [`strategy`]: the iterative default pipeline and its configuration
//!
//! ```rust
//! use flagger::strategy::{DefaultStrategy, Strategy};
//! use flagger::testset::gaussian_image_set;
//!
//! let set = gaussian_image_set(200, 32, 8, 1.0, 7).unwrap();
//! let mask = DefaultStrategy::default().run(&set, None).unwrap();
//! assert_eq!(mask.dim(), (32, 200));
//! ```

pub mod data;
pub mod detection;
pub mod error;
pub mod image_proc;
pub mod polarization;
pub mod render;
pub mod strategy;
pub mod testset;

pub use data::{ImageSet, PolarizedImage, TimeFrequencyData};
pub use error::FlagError;
pub use polarization::{ComplexRepresentation, Polarization};
pub use strategy::{flag_batch, DefaultStrategy, Strategy, StrategyConfig, SumThresholdStrategy};
