//! Synthetic observations for tests, benches and the command line tool.
//!
//! Everything here is seeded: the same seed always produces the same data.

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::ImageSet;
use crate::error::FlagError;

/// Zero-mean Gaussian noise of the given standard deviation, shaped
/// `(channels, time_steps)`.
///
/// # Examples
/// ```
/// use flagger::testset::noise_image;
///
/// let noise = noise_image((16, 64), 1.0, 42);
/// assert_eq!(noise.dim(), (16, 64));
/// assert_eq!(noise, noise_image((16, 64), 1.0, 42));
/// ```
pub fn noise_image(shape: (usize, usize), std_dev: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn(shape, |_| {
        let z: f64 = rng.sample(StandardNormal);
        z * std_dev
    })
}

/// An image set of `count` independent noise buffers.
///
/// Buffer `i` is generated from `seed + i`, in parallel.
pub fn gaussian_image_set(
    width: usize,
    height: usize,
    count: usize,
    std_dev: f64,
    seed: u64,
) -> Result<ImageSet, FlagError> {
    if !(std_dev.is_finite() && std_dev >= 0.0) {
        return Err(FlagError::InvalidConfig(format!(
            "noise standard deviation must be non-negative, got {std_dev}"
        )));
    }
    let buffers = (0..count as u64)
        .into_par_iter()
        .map(|i| noise_image((height, width), std_dev, seed.wrapping_add(i)))
        .collect();
    ImageSet::from_buffers(buffers)
}

/// Shapes of interference added on top of noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RfiPattern {
    /// A rectangle of channels `channels.0..channels.1` and time steps
    /// `time_steps.0..time_steps.1`.
    Block {
        channels: (usize, usize),
        time_steps: (usize, usize),
        amplitude: f64,
    },
    /// One channel over the whole observation.
    Narrowband { channel: usize, amplitude: f64 },
    /// One time step over all channels.
    Broadband { time_step: usize, amplitude: f64 },
}

impl RfiPattern {
    /// Channel and time-step ranges covered on an image of `shape`.
    fn extent(
        &self,
        shape: (usize, usize),
    ) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>), FlagError> {
        let (channels, time_steps) = shape;
        let (rows, cols) = match *self {
            RfiPattern::Block {
                channels: (c0, c1),
                time_steps: (t0, t1),
                ..
            } => (c0..c1, t0..t1),
            RfiPattern::Narrowband { channel, .. } => (channel..channel + 1, 0..time_steps),
            RfiPattern::Broadband { time_step, .. } => (0..channels, time_step..time_step + 1),
        };
        if rows.start >= rows.end
            || cols.start >= cols.end
            || rows.end > channels
            || cols.end > time_steps
        {
            return Err(FlagError::InvalidConfig(format!(
                "RFI pattern {self:?} does not fit a {channels}x{time_steps} image"
            )));
        }
        Ok((rows, cols))
    }

    pub fn amplitude(&self) -> f64 {
        match *self {
            RfiPattern::Block { amplitude, .. }
            | RfiPattern::Narrowband { amplitude, .. }
            | RfiPattern::Broadband { amplitude, .. } => amplitude,
        }
    }

    /// Add the pattern's amplitude to the covered samples.
    pub fn inject(&self, image: &mut Array2<f64>) -> Result<(), FlagError> {
        let (rows, cols) = self.extent(image.dim())?;
        let amplitude = self.amplitude();
        image
            .slice_mut(s![rows, cols])
            .mapv_inplace(|v| v + amplitude);
        Ok(())
    }

    /// Samples the pattern covers, as a mask of `shape`.
    pub fn mask(&self, shape: (usize, usize)) -> Result<Array2<bool>, FlagError> {
        let (rows, cols) = self.extent(shape)?;
        let mut mask = Array2::from_elem(shape, false);
        mask.slice_mut(s![rows, cols]).fill(true);
        Ok(mask)
    }

    /// Inject into the real part of every polarization (every buffer of a
    /// single amplitude image).
    pub fn inject_into_set(&self, set: &mut ImageSet) -> Result<(), FlagError> {
        let stride = if set.image_count() == 1 { 1 } else { 2 };
        for index in (0..set.image_count()).step_by(stride) {
            if let Some(image) = set.image_mut(index) {
                self.inject(image)?;
            }
        }
        Ok(())
    }
}
