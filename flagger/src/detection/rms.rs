//! RMS thresholding along channels and time steps.
//!
//! The per-sample operators compare every sample with robust statistics of its
//! own channel (time-step variant) or its own time step (channel variant). The
//! whole-slice operators instead rank entire channels or time steps by their
//! RMS and flag the outliers completely.
//!
//! Images are indexed `[[channel, time_step]]`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_shape, FlagError};
use crate::image_proc::stats::{median_of, winsorized_mean_and_stddev_of};

/// Relative spread below which a slice counts as constant.
const DEGENERATE_SPREAD: f64 = 1e-12;

/// Window of the sliding median removed from the per-time-step RMS series.
pub const TIMESTEP_MEDIAN_WINDOW: usize = 512;

/// How the strategy applies RMS thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RmsMode {
    /// Flag individual samples that deviate from their slice statistics.
    #[default]
    PerSample,
    /// Flag whole channels / time steps whose RMS is an outlier.
    WholeSlice,
}

fn check_threshold(threshold: f64) -> Result<(), FlagError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(FlagError::InvalidConfig(format!(
            "RMS threshold must be positive, got {threshold}"
        )))
    }
}

/// Flag samples deviating from the robust mean of their channel by more than
/// `threshold` robust standard deviations, in either direction.
///
/// Statistics are computed over the unflagged finite samples of each channel.
/// Channels with fewer than two such samples or with (near) zero spread
/// contribute no flags.
pub fn threshold_timestep_rms(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    threshold: f64,
) -> Result<(), FlagError> {
    check_threshold(threshold)?;
    ensure_shape(image.dim(), mask.dim())?;
    threshold_lanes(image, mask, Axis(1), threshold, true);
    Ok(())
}

/// Flag samples deviating from the robust mean of their time step.
///
/// Identical to [`threshold_timestep_rms`] but along the frequency axis. With
/// `flag_low_values` false only samples above the mean are flagged.
pub fn threshold_channel_rms(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    threshold: f64,
    flag_low_values: bool,
) -> Result<(), FlagError> {
    check_threshold(threshold)?;
    ensure_shape(image.dim(), mask.dim())?;
    threshold_lanes(image, mask, Axis(0), threshold, flag_low_values);
    Ok(())
}

fn threshold_lanes(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    axis: Axis,
    threshold: f64,
    flag_low_values: bool,
) {
    let mut scratch = Vec::new();
    Zip::from(image.lanes(axis))
        .and(mask.lanes_mut(axis))
        .for_each(|values, flags| {
            threshold_lane(values, flags, threshold, flag_low_values, &mut scratch)
        });
}

fn threshold_lane(
    values: ArrayView1<f64>,
    mut flags: ArrayViewMut1<bool>,
    threshold: f64,
    flag_low_values: bool,
    scratch: &mut Vec<f64>,
) {
    scratch.clear();
    scratch.extend(
        values
            .iter()
            .zip(flags.iter())
            .filter(|(v, &f)| !f && v.is_finite())
            .map(|(&v, _)| v),
    );
    if scratch.len() < 2 {
        return;
    }
    let Some(stats) = winsorized_mean_and_stddev_of(scratch) else {
        return;
    };
    if !(stats.stddev > DEGENERATE_SPREAD * stats.mean.abs().max(1.0)) {
        return;
    }

    let limit = threshold * stats.stddev;
    for (&v, flag) in values.iter().zip(flags.iter_mut()) {
        let deviation = v - stats.mean;
        if v.is_finite() && (deviation > limit || (flag_low_values && -deviation > limit)) {
            *flag = true;
        }
    }
}

/// Root mean square of the unflagged finite samples of each lane.
fn lane_rms(image: ArrayView2<f64>, mask: ArrayView2<bool>, axis: Axis) -> Vec<Option<f64>> {
    image
        .lanes(axis)
        .into_iter()
        .zip(mask.lanes(axis))
        .map(|(values, flags)| {
            let (sum_sq, count) = values
                .iter()
                .zip(flags.iter())
                .filter(|(v, &f)| !f && v.is_finite())
                .fold((0.0, 0usize), |(s, n), (&v, _)| (s + v * v, n + 1));
            (count > 0).then(|| (sum_sq / count as f64).sqrt())
        })
        .collect()
}

/// Population standard deviation of the present values around `center`.
fn spread_around(series: &[Option<f64>], center: f64) -> f64 {
    let (sum_sq, count) = series
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), &v| (s + (v - center).powi(2), n + 1));
    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

/// Subtract from each present value the median of the present values in a
/// centered window of `window` entries.
fn subtract_sliding_median(series: &mut [Option<f64>], window: usize) {
    let original: Vec<Option<f64>> = series.to_vec();
    let half = window / 2;
    let mut buffer = Vec::with_capacity(window);
    for (i, entry) in series.iter_mut().enumerate() {
        let Some(value) = entry else {
            continue;
        };
        let lo = i.saturating_sub(half);
        let hi = (i + half).min(original.len().saturating_sub(1));
        buffer.clear();
        buffer.extend(original[lo..=hi].iter().flatten().copied());
        if let Some(median) = median_of(&mut buffer) {
            *value -= median;
        }
    }
}

/// Flag whole channels whose RMS is an outlier among all channels.
///
/// The channel RMS values are iteratively clipped: each round flags every
/// channel deviating from the median RMS by more than `threshold` standard
/// deviations (only upwards unless `flag_low_values`), removes them from the
/// statistics and repeats until nothing changes.
pub fn flag_noisy_channels(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    threshold: f64,
    flag_low_values: bool,
) -> Result<(), FlagError> {
    check_threshold(threshold)?;
    ensure_shape(image.dim(), mask.dim())?;
    let mut channels = lane_rms(image, mask.view(), Axis(1));

    loop {
        let mut present: Vec<f64> = channels.iter().flatten().copied().collect();
        let Some(median) = median_of(&mut present) else {
            break;
        };
        let limit = threshold * spread_around(&channels, median);
        let mut changed = false;
        for (ch, entry) in channels.iter_mut().enumerate() {
            if let Some(rms) = *entry {
                if rms - median > limit || (flag_low_values && median - rms > limit) {
                    mask.row_mut(ch).fill(true);
                    *entry = None;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// Flag whole time steps whose RMS stands out from its neighbourhood.
///
/// A sliding median over [`TIMESTEP_MEDIAN_WINDOW`] time steps is removed from
/// the per-time-step RMS series first, so slow drifts are not flagged. The
/// residual series is then clipped in both directions as in
/// [`flag_noisy_channels`].
pub fn flag_noisy_timesteps(
    image: ArrayView2<f64>,
    mask: &mut Array2<bool>,
    threshold: f64,
) -> Result<(), FlagError> {
    check_threshold(threshold)?;
    ensure_shape(image.dim(), mask.dim())?;
    let mut timesteps = lane_rms(image, mask.view(), Axis(0));
    subtract_sliding_median(&mut timesteps, TIMESTEP_MEDIAN_WINDOW);

    loop {
        let limit = threshold * spread_around(&timesteps, 0.0);
        let mut changed = false;
        for (t, entry) in timesteps.iter_mut().enumerate() {
            if let Some(residual) = *entry {
                if residual.abs() > limit {
                    mask.column_mut(t).fill(true);
                    *entry = None;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// RMS of every channel, `NaN` where no unflagged sample remains.
pub fn channel_rms(image: ArrayView2<f64>, mask: ArrayView2<bool>) -> Array1<f64> {
    lane_rms(image, mask, Axis(1))
        .into_iter()
        .map(|rms| rms.unwrap_or(f64::NAN))
        .collect()
}
