//! Block down-sampling and block-replicating up-sampling.
//!
//! Images are indexed `[[channel, time_step]]`: the horizontal factor acts on
//! time steps (columns), the vertical factor on channels (rows).

use ndarray::{s, Array2, ArrayView2, Zip};

use crate::error::FlagError;

fn check_factors(horizontal: usize, vertical: usize) -> Result<(), FlagError> {
    if horizontal == 0 || vertical == 0 {
        return Err(FlagError::InvalidConfig(format!(
            "resampling factors must be at least 1, got {horizontal}x{vertical}"
        )));
    }
    Ok(())
}

/// Shape after shrinking `shape` by the given factors (partial edge blocks
/// count as a full output sample).
pub fn shrunk_shape(shape: (usize, usize), horizontal: usize, vertical: usize) -> (usize, usize) {
    (shape.0.div_ceil(vertical), shape.1.div_ceil(horizontal))
}

/// Average non-overlapping `horizontal × vertical` blocks, ignoring flagged
/// samples.
///
/// Returns the low-resolution image together with its companion mask. A block
/// in which every sample is flagged (or non-finite) yields 0 and is flagged in
/// the companion mask, so later stages can ignore it.
///
/// # Errors
/// `FlagError::InvalidConfig` for a zero factor, `FlagError::DimensionMismatch`
/// when the mask does not match the image.
pub fn shrink(
    image: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    horizontal: usize,
    vertical: usize,
) -> Result<(Array2<f64>, Array2<bool>), FlagError> {
    check_factors(horizontal, vertical)?;
    crate::error::ensure_shape(image.dim(), mask.dim())?;

    let (rows, cols) = image.dim();
    let out_shape = shrunk_shape((rows, cols), horizontal, vertical);
    let mut shrunk = Array2::<f64>::zeros(out_shape);
    let mut shrunk_mask = Array2::from_elem(out_shape, false);

    Zip::indexed(&mut shrunk)
        .and(&mut shrunk_mask)
        .for_each(|(r, c), value, flagged| {
            let r0 = r * vertical;
            let c0 = c * horizontal;
            let r1 = (r0 + vertical).min(rows);
            let c1 = (c0 + horizontal).min(cols);

            let mut sum = 0.0;
            let mut count = 0usize;
            Zip::from(image.slice(s![r0..r1, c0..c1]))
                .and(mask.slice(s![r0..r1, c0..c1]))
                .for_each(|&v, &m| {
                    if !m && v.is_finite() {
                        sum += v;
                        count += 1;
                    }
                });

            if count > 0 {
                *value = sum / count as f64;
            } else {
                *flagged = true;
            }
        });

    Ok((shrunk, shrunk_mask))
}

/// Replicate each low-resolution sample over its block, producing an image of
/// exactly `target_shape`.
///
/// # Errors
/// `FlagError::DimensionMismatch` when `source` does not cover the target at the
/// given factors, `FlagError::InvalidConfig` for a zero factor.
pub fn enlarge(
    source: ArrayView2<f64>,
    target_shape: (usize, usize),
    horizontal: usize,
    vertical: usize,
) -> Result<Array2<f64>, FlagError> {
    check_factors(horizontal, vertical)?;
    let needed = shrunk_shape(target_shape, horizontal, vertical);
    if source.nrows() < needed.0 || source.ncols() < needed.1 {
        return Err(FlagError::DimensionMismatch {
            expected: needed,
            found: source.dim(),
        });
    }

    Ok(Array2::from_shape_fn(target_shape, |(r, c)| {
        source[[r / vertical, c / horizontal]]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_shrink_averages_blocks() {
        let image = array![
            [1.0, 3.0, 5.0, 7.0],
            [1.0, 3.0, 5.0, 7.0],
            [10.0, 10.0, 20.0, 20.0]
        ];
        let mask = Array2::from_elem(image.dim(), false);
        let (shrunk, shrunk_mask) = shrink(image.view(), mask.view(), 2, 2).unwrap();

        assert_eq!(shrunk.dim(), (2, 2));
        assert_eq!(shrunk, array![[2.0, 6.0], [10.0, 20.0]]);
        assert!(shrunk_mask.iter().all(|&m| !m));
    }

    #[test]
    fn test_shrink_excludes_flags() {
        let image = array![[1.0, 100.0], [3.0, 100.0]];
        let mask = array![[false, true], [false, true]];
        let (shrunk, shrunk_mask) = shrink(image.view(), mask.view(), 2, 1).unwrap();
        assert_eq!(shrunk, array![[1.0], [3.0]]);
        assert_eq!(shrunk_mask, array![[false], [false]]);

        let (shrunk, shrunk_mask) = shrink(image.view(), mask.view(), 1, 2).unwrap();
        assert_eq!(shrunk, array![[2.0, 0.0]]);
        assert_eq!(shrunk_mask, array![[false, true]]);
    }

    #[test]
    fn test_partial_edge_blocks() {
        let image = Array2::from_shape_fn((7, 10), |(r, c)| (r * 10 + c) as f64);
        let mask = Array2::from_elem(image.dim(), false);
        let (shrunk, _) = shrink(image.view(), mask.view(), 3, 3).unwrap();
        assert_eq!(shrunk.dim(), (3, 4));
        // Last row block holds only row 6, last column block only column 9.
        assert_relative_eq!(shrunk[[2, 3]], 69.0);
    }

    #[test]
    fn test_enlarge_replicates_blocks() {
        let source = array![[1.0, 2.0], [3.0, 4.0]];
        let enlarged = enlarge(source.view(), (3, 4), 2, 2).unwrap();
        assert_eq!(
            enlarged,
            array![
                [1.0, 1.0, 2.0, 2.0],
                [1.0, 1.0, 2.0, 2.0],
                [3.0, 3.0, 4.0, 4.0]
            ]
        );
    }

    #[test]
    fn test_enlarge_rejects_small_source() {
        let source = Array2::<f64>::zeros((1, 2));
        assert!(matches!(
            enlarge(source.view(), (5, 4), 2, 2),
            Err(FlagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_constant_round_trip() {
        let image = Array2::from_elem((256, 100), 4.25);
        let mask = Array2::from_elem(image.dim(), false);
        let (shrunk, _) = shrink(image.view(), mask.view(), 3, 3).unwrap();
        let restored = enlarge(shrunk.view(), image.dim(), 3, 3).unwrap();
        assert_eq!(restored.dim(), image.dim());
        for &v in restored.iter() {
            assert_relative_eq!(v, 4.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_factor() {
        let image = Array2::<f64>::zeros((2, 2));
        let mask = Array2::from_elem((2, 2), false);
        assert!(shrink(image.view(), mask.view(), 0, 1).is_err());
        assert!(enlarge(image.view(), (2, 2), 1, 0).is_err());
    }
}
