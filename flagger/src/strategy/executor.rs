//! The iterative flagging pipeline and a single-pass SumThreshold strategy.
//!
//! [`DefaultStrategy`] runs, for every requested polarization and
//! representation, a sequence of SumThreshold and RMS passes at decreasing
//! thresholds. Between passes a smooth baseline (shrink, low-pass, enlarge) is
//! fitted to the unflagged data and subtracted, so later passes see residuals.
//! Finally the per-polarization masks are combined, dilated with the
//! scale-invariant rank operator and cleaned with one more RMS pass.

use ndarray::{Array2, ArrayView2};

use crate::data::{PolarizedImage, TimeFrequencyData};
use crate::detection::rms::{
    flag_noisy_channels, flag_noisy_timesteps, threshold_channel_rms, threshold_timestep_rms,
    RmsMode,
};
use crate::detection::sir::{scale_invariant_rank_operator, scale_invariant_rank_operator_masked};
use crate::detection::sumthreshold::ThresholdConfig;
use crate::detection::thresholds::ThresholdSequence;
use crate::error::FlagError;
use crate::image_proc::lowpass::LowPassFilter;
use crate::image_proc::mask::{flagged_fraction, join_into};
use crate::image_proc::resample::{enlarge, shrink};
use crate::polarization::{ComplexRepresentation, Polarization};

use super::config::StrategyConfig;
use super::Strategy;

/// Position of a [`DefaultStrategy`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Init,
    PerPolarization,
    PerRepresentation,
    Iterating,
    Finalizing,
    Done,
}

/// A point in the pipeline at which the current mask is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    /// After detection and baseline removal of one iterative pass.
    Iteration {
        polarization: Polarization,
        representation: ComplexRepresentation,
        index: usize,
        threshold: f64,
    },
    /// After the final SumThreshold pass of one representation.
    Final {
        polarization: Polarization,
        representation: ComplexRepresentation,
    },
    /// Combined mask after the rank operator.
    RankOperator,
    /// Combined mask after the last RMS pass; this is the result.
    Done,
}

/// Polarizations a configuration asks for, checked against the data.
fn resolve_polarizations(
    config: &StrategyConfig,
    data: &TimeFrequencyData,
) -> Result<Vec<Polarization>, FlagError> {
    let input = data.polarizations();
    let targets = config.polarizations.clone().unwrap_or_else(|| input.clone());

    for &polarization in &targets {
        if !data.can_provide(polarization) {
            return Err(FlagError::UnknownPolarization(polarization));
        }
        // Derived polarizations are complex and convert to anything.
        let Some(stored) = data.polarization_data(polarization) else {
            continue;
        };
        let from = stored.representation();
        for &to in &config.representations {
            if from != to && from != ComplexRepresentation::ComplexParts {
                return Err(FlagError::UnsupportedConversion { from, to });
            }
        }
    }
    Ok(targets)
}

/// Hand the flags of one representation back to the data: stored
/// polarizations get the (complex) result, derived ones pass their flags on
/// to their sources. Phase cannot be made complex again, so only its flags
/// are kept.
fn store_result(
    data: &mut TimeFrequencyData,
    polarization: Polarization,
    image: PolarizedImage,
) -> Result<(), FlagError> {
    if data.contains(polarization) && image.representation() != ComplexRepresentation::Phase {
        data.set_polarization_data(polarization, image.make_complex()?)
    } else {
        data.join_mask(polarization, &image)
    }
}

/// SumThreshold at `threshold` in both directions, skipping `missing` samples
/// when given.
fn sumthreshold_pass(
    sumthreshold: &ThresholdConfig,
    missing: Option<&Array2<bool>>,
    working: &mut PolarizedImage,
    threshold: f64,
) -> Result<(), FlagError> {
    let (image, mask) = working.image_and_mask_mut()?;
    match missing {
        Some(missing) => {
            sumthreshold.execute_with_missing(image, mask, missing.view(), threshold, threshold)
        }
        None => sumthreshold.execute(image, mask, threshold, threshold),
    }
}

/// Input flags kept by the configuration, which later passes treat as
/// missing data.
fn kept_input_flags(config: &StrategyConfig, data: &TimeFrequencyData) -> Option<Array2<bool>> {
    (!config.clear_input_mask).then(|| data.combined_mask())
}

/// Fold the result of one representation into the previous ones: the latest
/// image is kept, carrying the union of all masks so far.
fn merge_representation(
    previous: Option<PolarizedImage>,
    mut latest: PolarizedImage,
) -> Result<PolarizedImage, FlagError> {
    if let Some(previous) = previous {
        join_into(latest.mask_mut(), previous.mask().view())?;
    }
    Ok(latest)
}

/// The full iterative pipeline.
#[derive(Debug, Clone, Default)]
pub struct DefaultStrategy {
    config: StrategyConfig,
}

impl DefaultStrategy {
    /// # Errors
    /// `FlagError::InvalidConfig` when `config` does not validate.
    pub fn new(config: StrategyConfig) -> Result<Self, FlagError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Flag `data`, reporting the mask after every stage to `observer`.
    ///
    /// Within one polarization and representation, the reported masks only
    /// grow; the `RankOperator` mask contains every earlier flag.
    pub fn flag_observed<F>(
        &self,
        data: &mut TimeFrequencyData,
        observer: F,
    ) -> Result<(), FlagError>
    where
        F: FnMut(Stage, ArrayView2<bool>),
    {
        let mut run = Run::new(&self.config, observer)?;
        run.execute(data)
    }
}

impl Strategy for DefaultStrategy {
    fn name(&self) -> &str {
        "default"
    }

    fn flag(&self, data: &mut TimeFrequencyData) -> Result<(), FlagError> {
        self.flag_observed(data, |_, _| {})
    }
}

/// State of one invocation of [`DefaultStrategy`].
struct Run<'a, F> {
    config: &'a StrategyConfig,
    sequence: ThresholdSequence,
    sumthreshold: ThresholdConfig,
    low_pass: LowPassFilter,
    missing: Option<Array2<bool>>,
    state: ExecutorState,
    observer: F,
}

impl<'a, F> Run<'a, F>
where
    F: FnMut(Stage, ArrayView2<bool>),
{
    fn new(config: &'a StrategyConfig, observer: F) -> Result<Self, FlagError> {
        config.validate()?;
        Ok(Self {
            config,
            sequence: config.threshold_sequence()?,
            sumthreshold: config.sumthreshold.threshold_config()?,
            low_pass: config.low_pass.filter()?,
            missing: None,
            state: ExecutorState::Init,
            observer,
        })
    }

    fn transition(&mut self, next: ExecutorState) {
        log::debug!("strategy state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn execute(&mut self, data: &mut TimeFrequencyData) -> Result<(), FlagError> {
        let config = self.config;
        let targets = resolve_polarizations(config, data)?;
        self.missing = kept_input_flags(config, data);
        if config.clear_input_mask {
            data.clear_mask();
        }

        for polarization in targets {
            self.transition(ExecutorState::PerPolarization);
            log::info!("Flagging polarization {polarization}");

            let snapshot = data.convert_to_polarization(polarization)?;
            let mut result = None;
            for &representation in &config.representations {
                self.transition(ExecutorState::PerRepresentation);
                let original = snapshot.to_representation(representation)?;
                let working = self.iterate(&original)?;

                self.transition(ExecutorState::Finalizing);
                let finished = self.finalize(working)?;
                result = Some(merge_representation(result, finished)?);
            }
            if let Some(result) = result {
                store_result(data, polarization, result)?;
            }
        }

        self.combine(data)?;
        self.transition(ExecutorState::Done);
        Ok(())
    }

    /// Detection passes at the decreasing thresholds, each followed by
    /// baseline removal. Returns the last residual.
    fn iterate(&mut self, original: &PolarizedImage) -> Result<PolarizedImage, FlagError> {
        let shape = original.shape();
        let mut working = original.clone();
        if self.sequence.is_empty() {
            return Ok(working);
        }
        self.transition(ExecutorState::Iterating);

        let factors = self.sequence.factors().to_vec();
        for (index, (factor, threshold)) in factors
            .into_iter()
            .zip(self.sequence.effective_thresholds())
            .enumerate()
        {
            log::debug!(
                "{} {}: pass {index} at threshold {threshold:.3}",
                original.polarization(),
                original.representation()
            );
            self.detect(&mut working, threshold, factor)?;

            let (shrunk, shrunk_mask) = shrink(
                original.single_image()?.view(),
                working.mask().view(),
                self.config.shrink_horizontal,
                self.config.shrink_vertical,
            )?;
            let smooth = self
                .low_pass
                .apply_low_pass(shrunk.view(), shrunk_mask.view())?;
            let baseline = enlarge(
                smooth.view(),
                shape,
                self.config.shrink_horizontal,
                self.config.shrink_vertical,
            )?;
            working = original.residual(baseline.view(), working.mask().view())?;

            (self.observer)(
                Stage::Iteration {
                    polarization: original.polarization(),
                    representation: original.representation(),
                    index,
                    threshold,
                },
                working.mask().view(),
            );
        }
        Ok(working)
    }

    /// SumThreshold in both directions, then RMS thresholding along time on
    /// the working image and along frequency on a copy, joined afterwards.
    fn detect(
        &self,
        working: &mut PolarizedImage,
        threshold: f64,
        factor: f64,
    ) -> Result<(), FlagError> {
        let config = self.config;
        sumthreshold_pass(&self.sumthreshold, self.missing.as_ref(), working, threshold)?;
        let (image, mask) = working.image_and_mask_mut()?;

        let mut channel_mask = mask.clone();
        let channel_threshold = config.channel_rms_threshold * factor;
        match config.rms_mode {
            RmsMode::PerSample => {
                threshold_timestep_rms(image, mask, config.timestep_rms_threshold)?;
                threshold_channel_rms(
                    image,
                    &mut channel_mask,
                    channel_threshold,
                    config.channel_rms_flag_low_values,
                )?;
            }
            RmsMode::WholeSlice => {
                flag_noisy_timesteps(image, mask, config.timestep_rms_threshold)?;
                flag_noisy_channels(
                    image,
                    &mut channel_mask,
                    channel_threshold,
                    config.channel_rms_flag_low_values,
                )?;
            }
        }
        join_into(mask, channel_mask.view())
    }

    fn finalize(&mut self, mut working: PolarizedImage) -> Result<PolarizedImage, FlagError> {
        let base = self.sequence.base_threshold();
        sumthreshold_pass(&self.sumthreshold, self.missing.as_ref(), &mut working, base)?;
        log::debug!(
            "{} {}: {:.2}% flagged after final pass",
            working.polarization(),
            working.representation(),
            100.0 * flagged_fraction(working.mask().view())
        );
        (self.observer)(
            Stage::Final {
                polarization: working.polarization(),
                representation: working.representation(),
            },
            working.mask().view(),
        );
        Ok(working)
    }

    /// Rank operator and a last time-step RMS pass over all polarizations.
    fn combine(&mut self, data: &mut TimeFrequencyData) -> Result<(), FlagError> {
        let config = self.config;
        let mut mask = data.combined_mask();
        match &self.missing {
            Some(missing) => scale_invariant_rank_operator_masked(
                &mut mask,
                missing.view(),
                config.sir_eta_horizontal,
                config.sir_eta_vertical,
                config.sir_missing_penalty,
            )?,
            None => scale_invariant_rank_operator(
                &mut mask,
                config.sir_eta_horizontal,
                config.sir_eta_vertical,
            )?,
        }
        (self.observer)(Stage::RankOperator, mask.view());

        let image = data.combined_amplitude()?;
        let threshold = config.final_timestep_rms_threshold;
        match config.rms_mode {
            RmsMode::PerSample => threshold_timestep_rms(image.view(), &mut mask, threshold)?,
            RmsMode::WholeSlice => flag_noisy_timesteps(image.view(), &mut mask, threshold)?,
        }
        (self.observer)(Stage::Done, mask.view());

        let fraction = flagged_fraction(mask.view());
        if fraction >= 1.0 {
            log::warn!("Every sample is flagged");
        }
        log::info!("Flagged {:.2}% of the data", 100.0 * fraction);
        data.set_global_mask(&mask)
    }
}

/// One SumThreshold pass at the base threshold per polarization and
/// representation, without baseline fitting or post-processing.
#[derive(Debug, Clone, Default)]
pub struct SumThresholdStrategy {
    config: StrategyConfig,
}

impl SumThresholdStrategy {
    pub fn new(config: StrategyConfig) -> Result<Self, FlagError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }
}

impl Strategy for SumThresholdStrategy {
    fn name(&self) -> &str {
        "sumthreshold"
    }

    fn flag(&self, data: &mut TimeFrequencyData) -> Result<(), FlagError> {
        let config = &self.config;
        config.validate()?;
        let sumthreshold = config.sumthreshold.threshold_config()?;
        let targets = resolve_polarizations(config, data)?;
        let missing = kept_input_flags(config, data);
        if config.clear_input_mask {
            data.clear_mask();
        }

        for polarization in targets {
            let snapshot = data.convert_to_polarization(polarization)?;
            let mut result = None;
            for &representation in &config.representations {
                let mut image = snapshot.to_representation(representation)?;
                let base = config.base_threshold;
                sumthreshold_pass(&sumthreshold, missing.as_ref(), &mut image, base)?;
                result = Some(merge_representation(result, image)?);
            }
            if let Some(result) = result {
                store_result(data, polarization, result)?;
            }
        }
        log::info!(
            "Flagged {:.2}% of the data",
            100.0 * flagged_fraction(data.combined_mask().view())
        );
        Ok(())
    }
}
