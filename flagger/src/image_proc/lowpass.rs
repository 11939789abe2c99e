//! Masked separable Gaussian smoothing.
//!
//! Flagged samples are removed with normalized convolution: the values (with
//! flagged samples zeroed) and a weight map (1 for usable samples, 0 for
//! flagged ones) are convolved with the same kernel and the result is their
//! ratio. Outside the image both values and weights are zero, so at the edges
//! the truncated kernel is renormalized over the samples that exist. A
//! constant image therefore maps to itself, borders included.
//!
//! Kernel widths follow the usual convention of the detection strategies:
//! horizontal is the time axis (columns), vertical the frequency axis (rows).
//! The sigma parameters are squared sigmas, in samples.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};

use crate::error::{ensure_shape, FlagError};

/// Build a normalized 1D Gaussian kernel, `exp(-x² / 2σ²)` sampled at the
/// integer offsets of an odd window.
///
/// # Arguments
/// * `size` - Window size; an even size is widened by one sample
/// * `sigma_sq` - Squared standard deviation in samples
pub fn gaussian_kernel_1d(size: usize, sigma_sq: f64) -> Vec<f64> {
    let size = size | 1;
    let half = (size / 2) as f64;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - half;
            (-(x * x) / (2.0 * sigma_sq)).exp()
        })
        .collect();

    let sum: f64 = kernel.iter().sum();
    if sum > 0.0 {
        kernel.iter_mut().for_each(|k| *k /= sum);
    }
    kernel
}

/// Gaussian low-pass and high-pass filter that ignores flagged samples.
#[derive(Debug, Clone, PartialEq)]
pub struct LowPassFilter {
    h_window: usize,
    v_window: usize,
    h_sigma_sq: f64,
    v_sigma_sq: f64,
}

impl LowPassFilter {
    /// Create a filter. Even window sizes are widened by one sample.
    ///
    /// # Errors
    /// `FlagError::InvalidConfig` for a zero window or a non-positive sigma.
    pub fn new(
        kernel_width: usize,
        kernel_height: usize,
        horizontal_sigma_sq: f64,
        vertical_sigma_sq: f64,
    ) -> Result<Self, FlagError> {
        if kernel_width == 0 || kernel_height == 0 {
            return Err(FlagError::InvalidConfig(format!(
                "low-pass kernel must be non-empty, got {kernel_width}x{kernel_height}"
            )));
        }
        for sigma_sq in [horizontal_sigma_sq, vertical_sigma_sq] {
            if !(sigma_sq.is_finite() && sigma_sq > 0.0) {
                return Err(FlagError::InvalidConfig(format!(
                    "low-pass sigma squared must be positive, got {sigma_sq}"
                )));
            }
        }
        Ok(Self {
            h_window: kernel_width | 1,
            v_window: kernel_height | 1,
            h_sigma_sq: horizontal_sigma_sq,
            v_sigma_sq: vertical_sigma_sq,
        })
    }

    pub fn horizontal_window(&self) -> usize {
        self.h_window
    }

    pub fn vertical_window(&self) -> usize {
        self.v_window
    }

    /// Smooth `image`, ignoring samples that are flagged or not finite.
    /// Samples whose whole kernel footprint is unusable become 0.
    pub fn apply_low_pass(
        &self,
        image: ArrayView2<f64>,
        mask: ArrayView2<bool>,
    ) -> Result<Array2<f64>, FlagError> {
        ensure_shape(image.dim(), mask.dim())?;

        let mut values = Array2::<f64>::zeros(image.dim());
        let mut weights = Array2::<f64>::zeros(image.dim());
        Zip::from(&mut values)
            .and(&mut weights)
            .and(&image)
            .and(&mask)
            .for_each(|v, w, &x, &flagged| {
                if !flagged && x.is_finite() {
                    *v = x;
                    *w = 1.0;
                }
            });

        let h_kernel = gaussian_kernel_1d(self.h_window, self.h_sigma_sq);
        let v_kernel = gaussian_kernel_1d(self.v_window, self.v_sigma_sq);

        let values = convolve_axis(&convolve_axis(&values, &h_kernel, Axis(1)), &v_kernel, Axis(0));
        let weights =
            convolve_axis(&convolve_axis(&weights, &h_kernel, Axis(1)), &v_kernel, Axis(0));

        Ok(Zip::from(&values)
            .and(&weights)
            .map_collect(|&v, &w| if w > 0.0 { v / w } else { 0.0 }))
    }

    /// `image - low_pass(image)`: keeps the fast-varying part.
    pub fn apply_high_pass(
        &self,
        image: ArrayView2<f64>,
        mask: ArrayView2<bool>,
    ) -> Result<Array2<f64>, FlagError> {
        let smooth = self.apply_low_pass(image, mask)?;
        Ok(&image - &smooth)
    }
}

/// Convolve every lane along `axis` with a centered kernel, zero padded.
fn convolve_axis(input: &Array2<f64>, kernel: &[f64], axis: Axis) -> Array2<f64> {
    let mut output = Array2::<f64>::zeros(input.dim());
    Zip::from(input.lanes(axis))
        .and(output.lanes_mut(axis))
        .for_each(|lane, out| convolve_lane(lane, out, kernel));
    output
}

fn convolve_lane(input: ArrayView1<f64>, mut output: ArrayViewMut1<f64>, kernel: &[f64]) {
    let n = input.len() as isize;
    let half = (kernel.len() / 2) as isize;
    for (i, out) in output.iter_mut().enumerate() {
        let i = i as isize;
        let lo = (i - half).max(0);
        let hi = (i + half).min(n - 1);
        let mut acc = 0.0;
        for j in lo..=hi {
            acc += kernel[(j - i + half) as usize] * input[j as usize];
        }
        *out = acc;
    }
}
