//! Flag mask combination and summaries.
//!
//! Joining (logical OR) is the only way two masks are merged. Detectors never
//! clear a flag, so within one strategy run a mask only grows.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{ensure_shape, FlagError};

/// Union of two masks of identical shape.
///
/// # Examples
/// ```rust
/// use flagger::image_proc::mask::join;
/// use ndarray::array;
///
/// let a = array![[true, false], [false, false]];
/// let b = array![[false, false], [false, true]];
/// let joined = join(a.view(), b.view()).unwrap();
/// assert_eq!(joined, array![[true, false], [false, true]]);
/// ```
///
/// # Errors
/// `FlagError::DimensionMismatch` when the shapes differ.
pub fn join(a: ArrayView2<bool>, b: ArrayView2<bool>) -> Result<Array2<bool>, FlagError> {
    let mut joined = a.to_owned();
    join_into(&mut joined, b)?;
    Ok(joined)
}

/// In-place union: every flag of `other` is set on `target`.
pub fn join_into(target: &mut Array2<bool>, other: ArrayView2<bool>) -> Result<(), FlagError> {
    ensure_shape(target.dim(), other.dim())?;
    Zip::from(target)
        .and(&other)
        .for_each(|t, &o| *t = *t || o);
    Ok(())
}

/// Number of flagged samples.
pub fn flagged_count(mask: ArrayView2<bool>) -> usize {
    mask.iter().filter(|&&flag| flag).count()
}

/// Fraction of flagged samples, 0 for an empty mask.
pub fn flagged_fraction(mask: ArrayView2<bool>) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    flagged_count(mask) as f64 / mask.len() as f64
}

/// True when every flag of `before` is still set in `after`.
pub fn is_superset(after: ArrayView2<bool>, before: ArrayView2<bool>) -> bool {
    after.dim() == before.dim()
        && Zip::from(&after)
            .and(&before)
            .all(|&a, &b| a || !b)
}
