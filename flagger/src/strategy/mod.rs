//! Flagging strategies
//!
//! A strategy is a plain value implementing [`Strategy`]; hosts construct the
//! one they want and pass it around. Each invocation owns its data
//! exclusively, so independent observations can be flagged in parallel with
//! [`flag_batch`].

pub mod config;
pub mod executor;

pub use config::{LowPassSettings, StrategyConfig};
pub use executor::{DefaultStrategy, ExecutorState, Stage, SumThresholdStrategy};

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::{ImageSet, TimeFrequencyData};
use crate::error::FlagError;

/// Something that flags time-frequency data.
pub trait Strategy: Send + Sync {
    /// Short identifier used in logs and on the command line.
    fn name(&self) -> &str;

    /// Flag `data` in place. On error `data` may be partially flagged.
    fn flag(&self, data: &mut TimeFrequencyData) -> Result<(), FlagError>;

    /// Flag an image set and return the combined mask.
    fn run(&self, set: &ImageSet, mask: Option<&Array2<bool>>) -> Result<Array2<bool>, FlagError> {
        let mut data = TimeFrequencyData::from_image_set(set, mask)?;
        self.flag(&mut data)?;
        Ok(data.combined_mask())
    }
}

/// Flag every element of `inputs` in parallel.
///
/// Results are returned in input order; a failure affects only its own input.
pub fn flag_batch<S>(strategy: &S, inputs: &mut [TimeFrequencyData]) -> Vec<Result<(), FlagError>>
where
    S: Strategy + ?Sized,
{
    log::debug!(
        "Flagging {} observations with the {} strategy",
        inputs.len(),
        strategy.name()
    );
    inputs
        .par_iter_mut()
        .map(|data| strategy.flag(data))
        .collect()
}

/// Look up a built-in strategy by name.
pub fn strategy_by_name(
    name: &str,
    config: StrategyConfig,
) -> Result<Box<dyn Strategy>, FlagError> {
    match name {
        "default" => Ok(Box::new(DefaultStrategy::new(config)?)),
        "sumthreshold" => Ok(Box::new(SumThresholdStrategy::new(config)?)),
        other => Err(FlagError::InvalidConfig(format!(
            "unknown strategy '{other}', expected 'default' or 'sumthreshold'"
        ))),
    }
}
