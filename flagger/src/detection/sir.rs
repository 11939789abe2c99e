//! Scale-invariant rank (SIR) operator.
//!
//! Dilates a flag mask by an amount proportional to the size of the flagged
//! regions. A sample becomes flagged when some interval containing it has an
//! unflagged fraction of at most `eta`. With `eta = 0.2` an interval that is
//! 80% flagged is flagged completely; isolated flags do not grow.
//!
//! The test for one interval `[a, b)` is `Σ values[a..b] >= 0` with values
//! `eta` for flagged and `eta - 1` for unflagged samples. With prefix sums `W`,
//! the best interval containing `i` starts after the minimum of `W[0..=i]` and
//! ends at the maximum of `W[i+1..=n]`, which makes the operator O(n) per lane.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};

use crate::error::{ensure_shape, FlagError};

/// Intervals whose unflagged fraction equals `eta` exactly must still pass;
/// the prefix sums of a non-dyadic `eta` carry rounding error.
const SUM_TOLERANCE: f64 = 1e-9;

/// Reusable buffers for one lane length.
#[derive(Debug, Default)]
struct SirScratch {
    w: Vec<f64>,
    min_indices: Vec<usize>,
    max_indices: Vec<usize>,
}

fn check_eta(eta: f64) -> Result<(), FlagError> {
    if (0.0..=1.0).contains(&eta) {
        Ok(())
    } else {
        Err(FlagError::InvalidConfig(format!(
            "rank operator eta must be within [0, 1], got {eta}"
        )))
    }
}

/// Apply the operator to a single sequence of flags in place.
///
/// # Examples
/// ```rust
/// use flagger::detection::sir::operate;
///
/// let mut flags = [false, true, true, true, true, false, false, false];
/// operate(&mut flags, 0.2).unwrap();
/// assert_eq!(flags, [true, true, true, true, true, true, false, false]);
/// ```
pub fn operate(flags: &mut [bool], eta: f64) -> Result<(), FlagError> {
    check_eta(eta)?;
    let mut scratch = SirScratch::default();
    operate_lane(ArrayViewMut1::from(flags), eta, &mut scratch);
    Ok(())
}

/// Dilate every row (time direction).
pub fn operate_horizontally(mask: &mut Array2<bool>, eta: f64) -> Result<(), FlagError> {
    check_eta(eta)?;
    operate_axis(mask, eta, Axis(1));
    Ok(())
}

/// Dilate every column (frequency direction).
pub fn operate_vertically(mask: &mut Array2<bool>, eta: f64) -> Result<(), FlagError> {
    check_eta(eta)?;
    operate_axis(mask, eta, Axis(0));
    Ok(())
}

/// Horizontal pass with `eta_horizontal`, then vertical pass with
/// `eta_vertical`.
pub fn scale_invariant_rank_operator(
    mask: &mut Array2<bool>,
    eta_horizontal: f64,
    eta_vertical: f64,
) -> Result<(), FlagError> {
    check_eta(eta_horizontal)?;
    check_eta(eta_vertical)?;
    operate_axis(mask, eta_horizontal, Axis(1));
    operate_axis(mask, eta_vertical, Axis(0));
    Ok(())
}

fn operate_axis(mask: &mut Array2<bool>, eta: f64, axis: Axis) {
    let mut scratch = SirScratch::default();
    for lane in mask.lanes_mut(axis) {
        operate_lane(lane, eta, &mut scratch);
    }
}

impl SirScratch {
    /// Prefix sums `W` of `values`, the index of the minimum of `W[0..=i]`
    /// and the index of the maximum of `W[i+1..=n]`.
    fn prepare(&mut self, values: impl Iterator<Item = f64>) {
        let SirScratch {
            w,
            min_indices,
            max_indices,
        } = self;
        w.clear();
        min_indices.clear();
        max_indices.clear();

        w.push(0.0);
        min_indices.push(0);
        let mut current_min = 0;
        for (i, value) in values.enumerate() {
            w.push(w[i] + value);
            if w[i + 1] < w[current_min] {
                current_min = i + 1;
            }
            min_indices.push(current_min);
        }

        let n = w.len() - 1;
        max_indices.resize(n + 1, 0);
        let mut current_max = n;
        for i in (1..n).rev() {
            max_indices[i] = current_max;
            if w[i] > w[current_max] {
                current_max = i;
            }
        }
        max_indices[0] = current_max;
    }

    /// Whether the best interval through sample `i` has a non-negative sum.
    fn passes(&self, i: usize) -> bool {
        self.w[self.max_indices[i]] - self.w[self.min_indices[i]] >= -SUM_TOLERANCE
    }
}

fn operate_lane(mut flags: ArrayViewMut1<bool>, eta: f64, scratch: &mut SirScratch) {
    if flags.is_empty() {
        return;
    }
    scratch.prepare(flags.iter().map(|&flagged| if flagged { eta } else { eta - 1.0 }));
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = scratch.passes(i);
    }
}

/// Rank operator over a lane with holes. Without a penalty the missing
/// samples are removed from the lane; with one, each counts as
/// `penalty` unflagged samples. Missing samples keep their flag.
fn operate_lane_missing(
    mut flags: ArrayViewMut1<bool>,
    missing: ArrayView1<bool>,
    eta: f64,
    penalty: Option<f64>,
    present: &mut Vec<usize>,
    scratch: &mut SirScratch,
) {
    let value = |flagged: bool| if flagged { eta } else { eta - 1.0 };
    match penalty {
        None => {
            present.clear();
            present.extend((0..flags.len()).filter(|&i| !missing[i]));
            if present.is_empty() {
                return;
            }
            scratch.prepare(present.iter().map(|&i| value(flags[i])));
            for (k, &i) in present.iter().enumerate() {
                flags[i] = scratch.passes(k);
            }
        }
        Some(penalty) => {
            if flags.is_empty() {
                return;
            }
            let penalty_value = (eta - 1.0) * penalty;
            scratch.prepare(
                flags
                    .iter()
                    .zip(missing.iter())
                    .map(|(&flagged, &hole)| if hole { penalty_value } else { value(flagged) }),
            );
            for (i, flag) in flags.iter_mut().enumerate() {
                if !missing[i] {
                    *flag = scratch.passes(i);
                }
            }
        }
    }
}

fn operate_axis_missing(
    mask: &mut Array2<bool>,
    missing: ArrayView2<bool>,
    eta: f64,
    penalty: Option<f64>,
    axis: Axis,
) {
    let mut scratch = SirScratch::default();
    let mut present = Vec::new();
    Zip::from(mask.lanes_mut(axis))
        .and(missing.lanes(axis))
        .for_each(|lane, holes| {
            operate_lane_missing(lane, holes, eta, penalty, &mut present, &mut scratch)
        });
}

/// [`scale_invariant_rank_operator`] on a mask with holes.
///
/// Samples set in `missing` are not data. With `penalty` of `None` they are
/// skipped, so flags on both sides of a gap join as if it were absent. With
/// `Some(p)` a missing sample weighs as `p` unflagged samples, so wide gaps
/// still separate flagged regions. Missing samples are never changed.
///
/// # Errors
/// `FlagError::InvalidConfig` for an eta outside `[0, 1]` or a negative
/// penalty; `FlagError::DimensionMismatch` when the shapes differ.
pub fn scale_invariant_rank_operator_masked(
    mask: &mut Array2<bool>,
    missing: ArrayView2<bool>,
    eta_horizontal: f64,
    eta_vertical: f64,
    penalty: Option<f64>,
) -> Result<(), FlagError> {
    ensure_shape(mask.dim(), missing.dim())?;
    check_eta(eta_horizontal)?;
    check_eta(eta_vertical)?;
    if let Some(penalty) = penalty {
        if !(penalty.is_finite() && penalty >= 0.0) {
            return Err(FlagError::InvalidConfig(format!(
                "rank operator penalty must be non-negative, got {penalty}"
            )));
        }
    }
    operate_axis_missing(mask, missing, eta_horizontal, penalty, Axis(1));
    operate_axis_missing(mask, missing, eta_vertical, penalty, Axis(0));
    Ok(())
}
