//! SumThreshold detection.
//!
//! A window of `L` samples slides along every row (time direction) or column
//! (frequency direction). When the mean of the window's unflagged samples
//! exceeds a threshold that shrinks with `L`, every sample of the window is
//! flagged. Short windows catch strong narrow spikes, long windows catch weak
//! but persistent interference.
//!
//! Each pass reads the mask as it was when the pass began and writes new flags
//! into a scratch copy, so flags raised by one window never shorten the sums of
//! later windows in the same pass. Execution is additive: flags already in the
//! mask are never cleared.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_shape, FlagError};
use crate::image_proc::mask::join;
use crate::image_proc::stats::{
    all_finite, finite_copy, winsorized_mean_and_stddev, winsorized_mode,
};

/// Threshold growth per doubling of the window length.
const LENGTH_EXPONENT_BASE: f64 = 1.5;

/// Noise model used to scale thresholds to the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseDistribution {
    /// Scale by the winsorized standard deviation.
    Gaussian,
    /// Scale by the winsorized mode, suited to amplitudes.
    Rayleigh,
}

/// One window length and its unscaled threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdOperation {
    pub length: usize,
    pub threshold: f64,
}

/// Window lengths and thresholds for both scan directions.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    horizontal: Vec<ThresholdOperation>,
    vertical: Vec<ThresholdOperation>,
    distribution: NoiseDistribution,
}

impl ThresholdConfig {
    pub const DEFAULT_LENGTHS: [usize; 9] = [1, 2, 4, 8, 16, 32, 64, 128, 256];

    /// Use the first `length_count` default lengths in both directions, with
    /// `threshold(L) = first_threshold * 1.5^log2(L) / L`.
    ///
    /// # Errors
    /// `FlagError::InvalidConfig` when `length_count` is not in `1..=9` or the
    /// first threshold is not positive.
    pub fn new(
        first_threshold: f64,
        distribution: NoiseDistribution,
        length_count: usize,
    ) -> Result<Self, FlagError> {
        if length_count == 0 || length_count > Self::DEFAULT_LENGTHS.len() {
            return Err(FlagError::InvalidConfig(format!(
                "SumThreshold length count must be in 1..=9, got {length_count}"
            )));
        }
        if !(first_threshold.is_finite() && first_threshold > 0.0) {
            return Err(FlagError::InvalidConfig(format!(
                "SumThreshold first threshold must be positive, got {first_threshold}"
            )));
        }

        let operations: Vec<ThresholdOperation> = Self::DEFAULT_LENGTHS[..length_count]
            .iter()
            .map(|&length| ThresholdOperation {
                length,
                threshold: first_threshold
                    * LENGTH_EXPONENT_BASE.powf((length as f64).log2())
                    / length as f64,
            })
            .collect();

        Ok(Self {
            horizontal: operations.clone(),
            vertical: operations,
            distribution,
        })
    }

    pub fn horizontal_operations(&self) -> &[ThresholdOperation] {
        &self.horizontal
    }

    pub fn vertical_operations(&self) -> &[ThresholdOperation] {
        &self.vertical
    }

    pub fn distribution(&self) -> NoiseDistribution {
        self.distribution
    }

    pub fn remove_horizontal_operations(&mut self) {
        self.horizontal.clear();
    }

    pub fn remove_vertical_operations(&mut self) {
        self.vertical.clear();
    }

    /// Noise scale of the unflagged data under the configured distribution,
    /// or `None` when it is zero (all flagged, or constant data).
    fn noise_scale(&self, image: ArrayView2<f64>, mask: ArrayView2<bool>) -> Option<f64> {
        let scale = match self.distribution {
            NoiseDistribution::Gaussian => {
                winsorized_mean_and_stddev(image, mask).map_or(0.0, |stats| stats.stddev)
            }
            NoiseDistribution::Rayleigh => winsorized_mode(image, mask),
        };
        (scale != 0.0 && scale.is_finite()).then_some(scale)
    }

    /// Run every operation on `image`, adding flags to `mask`.
    ///
    /// Lengths run in increasing order, horizontal before vertical at each
    /// length. The thresholds are multiplied by the sensitivity of the
    /// direction and by the noise scale of the unflagged data; when that scale
    /// is zero only the sensitivity applies.
    ///
    /// # Arguments
    /// * `image` - Samples indexed `[[channel, time_step]]`
    /// * `mask` - Flags to extend, same shape as `image`
    /// * `time_sensitivity` - Multiplier for horizontal (time) thresholds
    /// * `frequency_sensitivity` - Multiplier for vertical (frequency) thresholds
    pub fn execute(
        &self,
        image: ArrayView2<f64>,
        mask: &mut Array2<bool>,
        time_sensitivity: f64,
        frequency_sensitivity: f64,
    ) -> Result<(), FlagError> {
        self.execute_inner(image, mask, None, time_sensitivity, frequency_sensitivity)
    }

    /// [`execute`](Self::execute) on data with holes.
    ///
    /// Samples set in `missing` do not exist: they stay out of the noise
    /// estimate, a window of length `L` spans `L` present samples, and
    /// missing samples are never flagged.
    pub fn execute_with_missing(
        &self,
        image: ArrayView2<f64>,
        mask: &mut Array2<bool>,
        missing: ArrayView2<bool>,
        time_sensitivity: f64,
        frequency_sensitivity: f64,
    ) -> Result<(), FlagError> {
        ensure_shape(image.dim(), missing.dim())?;
        self.execute_inner(
            image,
            mask,
            Some(missing),
            time_sensitivity,
            frequency_sensitivity,
        )
    }

    fn execute_inner(
        &self,
        image: ArrayView2<f64>,
        mask: &mut Array2<bool>,
        missing: Option<ArrayView2<bool>>,
        time_sensitivity: f64,
        frequency_sensitivity: f64,
    ) -> Result<(), FlagError> {
        ensure_shape(image.dim(), mask.dim())?;
        for sensitivity in [time_sensitivity, frequency_sensitivity] {
            if !(sensitivity.is_finite() && sensitivity >= 0.0) {
                return Err(FlagError::InvalidConfig(format!(
                    "SumThreshold sensitivity must be non-negative, got {sensitivity}"
                )));
            }
        }

        let finite;
        let image = if all_finite(image) {
            image.reborrow()
        } else {
            log::debug!("SumThreshold input has non-finite samples, replacing them with 0");
            finite = finite_copy(image);
            finite.view()
        };

        let scale = match missing {
            Some(missing) => self.noise_scale(image, join(mask.view(), missing)?.view()),
            None => self.noise_scale(image, mask.view()),
        };
        let (time_factor, frequency_factor) = match scale {
            Some(scale) => (time_sensitivity * scale, frequency_sensitivity * scale),
            None => (time_sensitivity, frequency_sensitivity),
        };

        let mut scratch = mask.clone();
        let operation_count = self.horizontal.len().max(self.vertical.len());
        for i in 0..operation_count {
            if let Some(op) = self.horizontal.get(i) {
                let threshold = op.threshold * time_factor;
                match missing {
                    Some(missing) => sumthreshold_missing_axis(
                        image,
                        mask,
                        missing,
                        &mut scratch,
                        op.length,
                        threshold,
                        Axis(1),
                    ),
                    None => {
                        sumthreshold_horizontal(image, mask, &mut scratch, op.length, threshold)
                    }
                }
            }
            if let Some(op) = self.vertical.get(i) {
                let threshold = op.threshold * frequency_factor;
                match missing {
                    Some(missing) => sumthreshold_missing_axis(
                        image,
                        mask,
                        missing,
                        &mut scratch,
                        op.length,
                        threshold,
                        Axis(0),
                    ),
                    None => {
                        sumthreshold_vertical(image, mask, &mut scratch, op.length, threshold)
                    }
                }
            }
        }
        Ok(())
    }
}

/// User-facing SumThreshold parameters, as stored in a strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SumThresholdSettings {
    /// Threshold for a single-sample window before noise scaling.
    pub first_threshold: f64,
    pub distribution: NoiseDistribution,
    /// How many of the default window lengths (1, 2, 4, ... 256) to use.
    pub length_count: usize,
    /// Scan along time.
    pub horizontal: bool,
    /// Scan along frequency.
    pub vertical: bool,
}

impl Default for SumThresholdSettings {
    fn default() -> Self {
        Self {
            first_threshold: 6.0,
            distribution: NoiseDistribution::Rayleigh,
            length_count: ThresholdConfig::DEFAULT_LENGTHS.len(),
            horizontal: true,
            vertical: true,
        }
    }
}

impl SumThresholdSettings {
    pub fn threshold_config(&self) -> Result<ThresholdConfig, FlagError> {
        let mut config =
            ThresholdConfig::new(self.first_threshold, self.distribution, self.length_count)?;
        if !self.horizontal {
            config.remove_horizontal_operations();
        }
        if !self.vertical {
            config.remove_vertical_operations();
        }
        Ok(config)
    }
}

/// Scan every row (time direction) with windows of `length` samples.
///
/// `scratch` must have the mask's shape; its contents are overwritten.
pub fn sumthreshold_horizontal(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
) {
    sumthreshold_axis(image, mask, scratch, length, threshold, Axis(1));
}

/// Scan every column (frequency direction) with windows of `length` samples.
pub fn sumthreshold_vertical(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
) {
    sumthreshold_axis(image, mask, scratch, length, threshold, Axis(0));
}

fn sumthreshold_axis(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
    axis: Axis,
) {
    scratch.assign(mask);
    Zip::from(image.lanes(axis))
        .and(mask.lanes(axis))
        .and(scratch.lanes_mut(axis))
        .for_each(|values, flags, out| sumthreshold_lane(values, flags, out, length, threshold));
    std::mem::swap(mask, scratch);
}

/// Scan every row, skipping samples set in `missing`.
pub fn sumthreshold_missing_horizontal(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    missing: ArrayView2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
) {
    sumthreshold_missing_axis(image, mask, missing, scratch, length, threshold, Axis(1));
}

/// Scan every column, skipping samples set in `missing`.
pub fn sumthreshold_missing_vertical(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    missing: ArrayView2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
) {
    sumthreshold_missing_axis(image, mask, missing, scratch, length, threshold, Axis(0));
}

fn sumthreshold_missing_axis(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    missing: ArrayView2<bool>,
    scratch: &mut Array2<bool>,
    length: usize,
    threshold: f64,
    axis: Axis,
) {
    scratch.assign(mask);
    let mut present = Vec::new();
    Zip::from(image.lanes(axis))
        .and(mask.lanes(axis))
        .and(missing.lanes(axis))
        .and(scratch.lanes_mut(axis))
        .for_each(|values, flags, holes, mut out| {
            present.clear();
            present.extend((0..values.len()).filter(|&i| !holes[i]));
            let values = values.select(Axis(0), &present);
            let flags = flags.select(Axis(0), &present);
            let mut found = Array1::from_elem(present.len(), false);
            sumthreshold_lane(values.view(), flags.view(), found.view_mut(), length, threshold);
            for (&index, &flagged) in present.iter().zip(&found) {
                if flagged {
                    out[index] = true;
                }
            }
        });
    std::mem::swap(mask, scratch);
}

fn sumthreshold_lane(
    values: ArrayView1<f64>,
    flags: ArrayView1<bool>,
    mut out: ArrayViewMut1<bool>,
    length: usize,
    threshold: f64,
) {
    let n = values.len();
    if length == 0 || length > n {
        return;
    }

    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..length - 1 {
        if !flags[i] {
            sum += values[i];
            count += 1;
        }
    }

    for right in (length - 1)..n {
        if !flags[right] {
            sum += values[right];
            count += 1;
        }
        let left = right + 1 - length;
        if count > 0 && (sum / count as f64).abs() > threshold {
            out.slice_mut(s![left..=right]).fill(true);
        }
        if !flags[left] {
            sum -= values[left];
            count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::mask::{flagged_count, is_superset};
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_default_thresholds() {
        let config = ThresholdConfig::new(6.0, NoiseDistribution::Rayleigh, 9).unwrap();
        let ops = config.horizontal_operations();
        assert_eq!(ops.len(), 9);
        assert_eq!(ops[0].length, 1);
        assert_relative_eq!(ops[0].threshold, 6.0);
        assert_relative_eq!(ops[1].threshold, 6.0 * 1.5 / 2.0);
        assert_relative_eq!(ops[8].threshold, 6.0 * 1.5f64.powi(8) / 256.0, epsilon = 1e-12);
        assert_eq!(config.vertical_operations(), ops);
    }

    #[test]
    fn test_invalid_length_count() {
        assert!(ThresholdConfig::new(6.0, NoiseDistribution::Gaussian, 0).is_err());
        assert!(ThresholdConfig::new(6.0, NoiseDistribution::Gaussian, 10).is_err());
        assert!(ThresholdConfig::new(-1.0, NoiseDistribution::Gaussian, 3).is_err());
    }

    #[test]
    fn test_single_sample_window() {
        let image = array![[0.0, 5.0, 0.0, -7.0]];
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_horizontal(image.view(), &mut mask, &mut scratch, 1, 4.0);
        assert_eq!(mask, array![[false, true, false, true]]);
    }

    #[test]
    fn test_window_flags_whole_run() {
        // Mean over any 3 consecutive samples of the plateau is 2.
        let image = array![[0.0, 2.0, 2.0, 2.0, 0.0, 0.0]];
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_horizontal(image.view(), &mut mask, &mut scratch, 3, 1.9);
        assert_eq!(mask, array![[false, true, true, true, false, false]]);
    }

    #[test]
    fn test_flagged_samples_excluded_from_sum() {
        // Without the flag on the spike every window containing it would trip.
        let image = array![[0.0, 0.0, 100.0, 0.0, 0.0]];
        let mut mask = array![[false, false, true, false, false]];
        let mut scratch = mask.clone();
        sumthreshold_horizontal(image.view(), &mut mask, &mut scratch, 2, 1.0);
        assert_eq!(flagged_count(mask.view()), 1);
        assert!(mask[[0, 2]]);
    }

    #[test]
    fn test_fully_flagged_window_is_noop() {
        let image = array![[9.0, 9.0], [9.0, 9.0]];
        let mut mask = Array2::from_elem(image.dim(), true);
        let mut scratch = mask.clone();
        sumthreshold_vertical(image.view(), &mut mask, &mut scratch, 2, 1.0);
        assert!(mask.iter().all(|&m| m));
    }

    #[test]
    fn test_vertical_scan() {
        let mut image = Array2::<f64>::zeros((8, 3));
        for r in 2..6 {
            image[[r, 1]] = 3.0;
        }
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_vertical(image.view(), &mut mask, &mut scratch, 4, 2.5);
        for r in 0..8 {
            assert_eq!(mask[[r, 1]], (2..6).contains(&r), "row {r}");
        }
        assert_eq!(flagged_count(mask.view()), 4);
    }

    #[test]
    fn test_length_longer_than_lane() {
        let image = Array2::from_elem((2, 3), 100.0);
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_horizontal(image.view(), &mut mask, &mut scratch, 4, 1.0);
        assert_eq!(flagged_count(mask.view()), 0);
    }

    #[test]
    fn test_execute_on_zero_image() {
        let config = SumThresholdSettings::default().threshold_config().unwrap();
        let image = Array2::<f64>::zeros((32, 64));
        let mut mask = Array2::from_elem(image.dim(), false);
        config.execute(image.view(), &mut mask, 1.4, 1.4).unwrap();
        assert_eq!(flagged_count(mask.view()), 0);
    }

    #[test]
    fn test_execute_is_additive() {
        let config = SumThresholdSettings::default().threshold_config().unwrap();
        let image = crate::testset::noise_image((64, 128), 1.0, 3);
        let mut mask = Array2::from_elem(image.dim(), false);
        mask[[10, 10]] = true;
        mask[[20, 0]] = true;
        let before = mask.clone();
        config.execute(image.view(), &mut mask, 1.4, 1.4).unwrap();
        assert!(is_superset(mask.view(), before.view()));
    }

    #[test]
    fn test_execute_finds_narrowband_line() {
        let config = SumThresholdSettings::default().threshold_config().unwrap();
        let mut image = crate::testset::noise_image((64, 256), 1.0, 5);
        for c in 0..256 {
            image[[30, c]] += 3.0;
        }
        let mut mask = Array2::from_elem(image.dim(), false);
        config.execute(image.view(), &mut mask, 1.4, 1.4).unwrap();

        let line_flags = mask.row(30).iter().filter(|&&m| m).count();
        assert!(line_flags > 200, "only {line_flags} line samples flagged");
        let total = flagged_count(mask.view());
        assert!(total - line_flags < 64 * 256 / 50, "{total} flags in total");
    }

    #[test]
    fn test_directions_can_be_removed() {
        let settings = SumThresholdSettings {
            vertical: false,
            ..Default::default()
        };
        let config = settings.threshold_config().unwrap();
        assert!(config.vertical_operations().is_empty());
        assert_eq!(config.horizontal_operations().len(), 9);
    }

    #[test]
    fn test_missing_samples_are_skipped() {
        // The spike pair is split by two missing samples; a window of two
        // present samples still joins them.
        let image = array![[0.0, 3.0, 50.0, 50.0, 3.0, 0.0]];
        let missing = array![[false, false, true, true, false, false]];
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_missing_horizontal(
            image.view(),
            &mut mask,
            missing.view(),
            &mut scratch,
            2,
            2.5,
        );
        assert_eq!(mask, array![[false, true, false, false, true, false]]);

        let mut plain = Array2::from_elem(image.dim(), false);
        sumthreshold_horizontal(image.view(), &mut plain, &mut scratch, 2, 2.5);
        assert!(plain[[0, 2]] && plain[[0, 3]]);
    }

    #[test]
    fn test_missing_vertical_matches_compacted_column() {
        let image = array![[4.0], [9.0], [4.0], [0.0]];
        let missing = array![[false], [true], [false], [false]];
        let mut mask = Array2::from_elem(image.dim(), false);
        let mut scratch = mask.clone();
        sumthreshold_missing_vertical(
            image.view(),
            &mut mask,
            missing.view(),
            &mut scratch,
            2,
            3.5,
        );
        assert_eq!(mask, array![[true], [false], [true], [false]]);
    }

    #[test]
    fn test_execute_with_missing_ignores_holes() {
        let config = SumThresholdSettings::default().threshold_config().unwrap();
        let mut image = crate::testset::noise_image((32, 128), 1.0, 9);
        let mut missing = Array2::from_elem(image.dim(), false);
        // Garbage in the holes must neither be flagged nor raise the noise level.
        for c in 0..128 {
            image[[5, c]] = 1e6;
            missing[[5, c]] = true;
        }
        for c in 40..80 {
            image[[20, c]] += 6.0;
        }
        let mut mask = Array2::from_elem(image.dim(), false);
        config
            .execute_with_missing(image.view(), &mut mask, missing.view(), 1.4, 1.4)
            .unwrap();

        assert!(mask.row(5).iter().all(|&m| !m));
        assert!(mask.slice(s![20, 40..80]).iter().filter(|&&m| m).count() > 35);
        assert!(config
            .execute_with_missing(image.view(), &mut mask, missing.slice(s![..4, ..]), 1.4, 1.4)
            .is_err());
    }

    #[test]
    fn test_non_finite_input_does_not_flag() {
        let config = SumThresholdSettings::default().threshold_config().unwrap();
        let mut image = Array2::<f64>::zeros((8, 8));
        image[[3, 3]] = f64::NAN;
        let mut mask = Array2::from_elem(image.dim(), false);
        config.execute(image.view(), &mut mask, 1.0, 1.0).unwrap();
        assert_eq!(flagged_count(mask.view()), 0);
    }
}
