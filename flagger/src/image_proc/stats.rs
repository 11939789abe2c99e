//! Robust statistics over unflagged samples.
//!
//! Both estimators winsorize: the most extreme samples are clamped to a
//! quantile instead of being discarded, and a fixed correction factor restores
//! the scale of the underlying noise distribution.

use ndarray::{Array2, ArrayView2, Zip};

/// Correction for clamping the top 10% of Rayleigh distributed amplitudes.
const RAYLEIGH_WINSOR_CORRECTION: f64 = 1.0541;

/// Variance correction for 10%/90% winsorized Gaussian samples.
const GAUSSIAN_WINSOR_VARIANCE_CORRECTION: f64 = 1.54;

/// Winsorized mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustStats {
    pub mean: f64,
    pub stddev: f64,
    /// Number of samples the estimate was computed from.
    pub count: usize,
}

/// Sorted index of the upper clamp for `n >= 1` samples: `ceil(0.9 n) - 1`.
fn upper_winsor_index(n: usize) -> usize {
    ((0.9 * n as f64).ceil() as usize).saturating_sub(1).min(n - 1)
}

/// Collect unflagged finite samples.
pub fn unflagged_values(image: ArrayView2<f64>, mask: ArrayView2<bool>) -> Vec<f64> {
    let mut values = Vec::with_capacity(image.len());
    Zip::from(&image).and(&mask).for_each(|&value, &flagged| {
        if !flagged && value.is_finite() {
            values.push(value);
        }
    });
    values
}

/// Copy of `image` with NaN and infinite samples replaced by zero.
pub fn finite_copy(image: ArrayView2<f64>) -> Array2<f64> {
    image.mapv(|v| if v.is_finite() { v } else { 0.0 })
}

/// Whether every sample is finite.
pub fn all_finite(image: ArrayView2<f64>) -> bool {
    image.iter().all(|v| v.is_finite())
}

/// Mode of Rayleigh distributed amplitudes, estimated after clamping the
/// highest 10% of unflagged samples.
///
/// The value at index `ceil(0.9 n) - 1` of the sorted samples becomes the upper
/// clamp, then `mode = sqrt(Σv² / 2n) · 1.0541`.
///
/// Returns 0 when no unflagged finite samples remain.
pub fn winsorized_mode(image: ArrayView2<f64>, mask: ArrayView2<bool>) -> f64 {
    let mut values = unflagged_values(image, mask);
    winsorized_mode_of(&mut values)
}

/// [`winsorized_mode`] over an arbitrary sample buffer, reordered in place.
pub fn winsorized_mode_of(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let high_index = upper_winsor_index(n);
    let (_, &mut high, _) = values.select_nth_unstable_by(high_index, f64::total_cmp);

    let sum_sq: f64 = values
        .iter()
        .map(|&v| {
            let clamped = if v > high { high } else { v };
            clamped * clamped
        })
        .sum();
    (sum_sq / (2.0 * n as f64)).sqrt() * RAYLEIGH_WINSOR_CORRECTION
}

/// Winsorized mean and standard deviation of the unflagged finite samples.
///
/// Samples below index `floor(0.1 n)` and above index `ceil(0.9 n) - 1` of the
/// sorted set are clamped to those values. The variance of the clamped set is
/// scaled by 1.54, which makes `stddev` an unbiased estimate for Gaussian noise.
///
/// Returns `None` when no samples are usable.
pub fn winsorized_mean_and_stddev(
    image: ArrayView2<f64>,
    mask: ArrayView2<bool>,
) -> Option<RobustStats> {
    let mut values = unflagged_values(image, mask);
    winsorized_mean_and_stddev_of(&mut values)
}

/// [`winsorized_mean_and_stddev`] over a sample buffer, which gets sorted.
pub fn winsorized_mean_and_stddev_of(values: &mut [f64]) -> Option<RobustStats> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let low = values[(0.1 * n as f64).floor() as usize];
    let high = values[upper_winsor_index(n)];
    let clamp = |v: f64| v.clamp(low, high);

    let mean = values.iter().map(|&v| clamp(v)).sum::<f64>() / n as f64;
    let variance = values
        .iter()
        .map(|&v| {
            let d = clamp(v) - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;

    Some(RobustStats {
        mean,
        stddev: (GAUSSIAN_WINSOR_VARIANCE_CORRECTION * variance).sqrt(),
        count: n,
    })
}

/// Plain median of a sample buffer, which gets reordered.
pub fn median_of(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, &mut upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    if n % 2 == 1 {
        Some(upper)
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(0.5 * (below + upper))
    }
}
