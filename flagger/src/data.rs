//! Time-frequency containers handed to a strategy.
//!
//! [`ImageSet`] is the raw host-facing buffer layout. [`TimeFrequencyData`]
//! interprets it as a set of [`PolarizedImage`]s, each holding one or two
//! images (depending on its [`ComplexRepresentation`]) and a flag mask.
//!
//! All images are indexed `[[channel, time_step]]`: rows are frequency
//! channels, columns are time steps.

use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex64;

use crate::error::{ensure_shape, FlagError};
use crate::image_proc::mask::join_into;
use crate::polarization::{ComplexRepresentation, Polarization};

/// Raw image buffers of one observation, all sharing the same shape.
///
/// The number of buffers selects how they are interpreted:
///
/// | Count | Layout                                  |
/// |-------|-----------------------------------------|
/// | 1     | Stokes I amplitude                      |
/// | 2     | Stokes I real, imaginary                |
/// | 4     | XX real, XX imag, YY real, YY imag      |
/// | 8     | XX, XY, YX, YY as (real, imag) pairs    |
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    width: usize,
    height: usize,
    images: Vec<Array2<f64>>,
}

impl ImageSet {
    /// Allocate `count` buffers of `height` channels by `width` time steps,
    /// filled with `initial_value`.
    ///
    /// # Examples
    /// ```rust
    /// use flagger::data::ImageSet;
    ///
    /// let set = ImageSet::new(100, 32, 8, 0.0).unwrap();
    /// assert_eq!(set.shape(), (32, 100));
    /// assert_eq!(set.polarizations().len(), 4);
    /// ```
    pub fn new(
        width: usize,
        height: usize,
        count: usize,
        initial_value: f64,
    ) -> Result<Self, FlagError> {
        Self::from_buffers(vec![Array2::from_elem((height, width), initial_value); count])
    }

    /// Wrap existing buffers, validating their count and shapes.
    pub fn from_buffers(images: Vec<Array2<f64>>) -> Result<Self, FlagError> {
        if !matches!(images.len(), 1 | 2 | 4 | 8) {
            return Err(FlagError::InvalidImageCount(images.len()));
        }
        let (height, width) = images[0].dim();
        if width == 0 || height == 0 {
            return Err(FlagError::InvalidConfig(format!(
                "image set must not be empty, got {height} channels by {width} time steps"
            )));
        }
        for image in &images[1..] {
            ensure_shape((height, width), image.dim())?;
        }
        Ok(Self {
            width,
            height,
            images,
        })
    }

    /// Number of time steps.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of frequency channels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(channels, time_steps)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[Array2<f64>] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&Array2<f64>> {
        self.images.get(index)
    }

    pub fn image_mut(&mut self, index: usize) -> Option<&mut Array2<f64>> {
        self.images.get_mut(index)
    }

    /// Polarizations stored in this set, in buffer order.
    pub fn polarizations(&self) -> Vec<Polarization> {
        match self.images.len() {
            4 => vec![Polarization::XX, Polarization::YY],
            8 => Polarization::LINEAR.to_vec(),
            _ => vec![Polarization::StokesI],
        }
    }
}

/// The images and flags of one polarization in one representation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarizedImage {
    polarization: Polarization,
    representation: ComplexRepresentation,
    images: Vec<Array2<f64>>,
    mask: Array2<bool>,
}

impl PolarizedImage {
    /// Build from the buffers a representation needs: two for
    /// `ComplexParts` (real, imaginary), one otherwise.
    pub fn new(
        polarization: Polarization,
        representation: ComplexRepresentation,
        images: Vec<Array2<f64>>,
        mask: Array2<bool>,
    ) -> Result<Self, FlagError> {
        if images.len() != representation.image_count() {
            return Err(FlagError::InvalidConfig(format!(
                "{representation} data of {polarization} needs {} image(s), got {}",
                representation.image_count(),
                images.len()
            )));
        }
        for image in &images {
            ensure_shape(mask.dim(), image.dim())?;
        }
        Ok(Self {
            polarization,
            representation,
            images,
            mask,
        })
    }

    pub fn new_complex(
        polarization: Polarization,
        real: Array2<f64>,
        imaginary: Array2<f64>,
        mask: Array2<bool>,
    ) -> Result<Self, FlagError> {
        Self::new(
            polarization,
            ComplexRepresentation::ComplexParts,
            vec![real, imaginary],
            mask,
        )
    }

    pub fn new_single(
        polarization: Polarization,
        representation: ComplexRepresentation,
        image: Array2<f64>,
        mask: Array2<bool>,
    ) -> Result<Self, FlagError> {
        Self::new(polarization, representation, vec![image], mask)
    }

    pub fn polarization(&self) -> Polarization {
        self.polarization
    }

    pub fn representation(&self) -> ComplexRepresentation {
        self.representation
    }

    /// `(channels, time_steps)`
    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn images(&self) -> &[Array2<f64>] {
        &self.images
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut Array2<bool> {
        &mut self.mask
    }

    pub fn set_mask(&mut self, mask: Array2<bool>) -> Result<(), FlagError> {
        ensure_shape(self.shape(), mask.dim())?;
        self.mask = mask;
        Ok(())
    }

    pub fn clear_mask(&mut self) {
        self.mask.fill(false);
    }

    /// The single image of a non-complex representation.
    ///
    /// # Errors
    /// `FlagError::InvalidConfig` for `ComplexParts` data, which holds two.
    pub fn single_image(&self) -> Result<&Array2<f64>, FlagError> {
        match self.images.as_slice() {
            [image] => Ok(image),
            _ => Err(FlagError::InvalidConfig(format!(
                "{} data of {} has no single image",
                self.representation, self.polarization
            ))),
        }
    }

    /// Borrow the single image together with the mutable mask, for detectors
    /// that read one and extend the other.
    pub fn image_and_mask_mut(
        &mut self,
    ) -> Result<(ArrayView2<'_, f64>, &mut Array2<bool>), FlagError> {
        match self.images.as_slice() {
            [image] => Ok((image.view(), &mut self.mask)),
            _ => Err(FlagError::InvalidConfig(format!(
                "{} data of {} has no single image",
                self.representation, self.polarization
            ))),
        }
    }

    /// Replace the single image, keeping the mask.
    pub fn set_image(&mut self, image: Array2<f64>) -> Result<(), FlagError> {
        ensure_shape(self.shape(), image.dim())?;
        match self.images.as_mut_slice() {
            [current] => {
                *current = image;
                Ok(())
            }
            _ => Err(FlagError::InvalidConfig(format!(
                "{} data of {} has no single image",
                self.representation, self.polarization
            ))),
        }
    }

    /// Samples as complex numbers. Only `ComplexParts` data has them.
    pub fn complex_values(&self) -> Result<Array2<Complex64>, FlagError> {
        match (self.representation, self.images.as_slice()) {
            (ComplexRepresentation::ComplexParts, [real, imaginary]) => Ok(Zip::from(real)
                .and(imaginary)
                .map_collect(|&re, &im| Complex64::new(re, im))),
            _ => Err(FlagError::UnsupportedConversion {
                from: self.representation,
                to: ComplexRepresentation::ComplexParts,
            }),
        }
    }

    /// Convert to another representation, carrying the mask along.
    ///
    /// Complex data converts to anything; any representation converts to
    /// itself. Everything else loses information and is rejected.
    pub fn to_representation(
        &self,
        target: ComplexRepresentation,
    ) -> Result<PolarizedImage, FlagError> {
        use ComplexRepresentation as R;

        if target == self.representation {
            return Ok(self.clone());
        }
        let image = match (self.representation, target, self.images.as_slice()) {
            (R::ComplexParts, R::Amplitude, [re, im]) => {
                Zip::from(re).and(im).map_collect(|&re, &im| re.hypot(im))
            }
            (R::ComplexParts, R::Phase, [re, im]) => {
                Zip::from(re).and(im).map_collect(|&re, &im| im.atan2(re))
            }
            (R::ComplexParts, R::Real, [re, _]) => re.clone(),
            (R::ComplexParts, R::Imaginary, [_, im]) => im.clone(),
            (from, to, _) => return Err(FlagError::UnsupportedConversion { from, to }),
        };
        Self::new_single(self.polarization, target, image, self.mask.clone())
    }

    /// Convert back to `ComplexParts`.
    ///
    /// Amplitude and real values become the real part, imaginary values the
    /// imaginary part; the other part is zero. Phase cannot be inverted.
    pub fn make_complex(&self) -> Result<PolarizedImage, FlagError> {
        use ComplexRepresentation as R;

        let zeros = || Array2::<f64>::zeros(self.shape());
        let (real, imaginary) = match (self.representation, self.images.as_slice()) {
            (R::ComplexParts, _) => return Ok(self.clone()),
            (R::Amplitude | R::Real, [image]) => (image.clone(), zeros()),
            (R::Imaginary, [image]) => (zeros(), image.clone()),
            (from, _) => {
                return Err(FlagError::UnsupportedConversion {
                    from,
                    to: R::ComplexParts,
                })
            }
        };
        Self::new_complex(self.polarization, real, imaginary, self.mask.clone())
    }

    /// `self - baseline` as a new single image, flagged wherever `self` or
    /// `extra_flags` is.
    pub fn residual(
        &self,
        baseline: ArrayView2<f64>,
        extra_flags: ArrayView2<bool>,
    ) -> Result<PolarizedImage, FlagError> {
        let image = self.single_image()?;
        ensure_shape(image.dim(), baseline.dim())?;
        let mut mask = self.mask.clone();
        join_into(&mut mask, extra_flags)?;
        Self::new_single(
            self.polarization,
            self.representation,
            image - &baseline,
            mask,
        )
    }

    /// Per-sample amplitude.
    ///
    /// Real and imaginary data give absolute values; phase data has no
    /// amplitude.
    pub fn amplitude_image(&self) -> Result<Array2<f64>, FlagError> {
        use ComplexRepresentation as R;

        match (self.representation, self.images.as_slice()) {
            (R::Amplitude, [image]) => Ok(image.clone()),
            (R::Real | R::Imaginary, [image]) => Ok(image.mapv(f64::abs)),
            (R::ComplexParts, [re, im]) => {
                Ok(Zip::from(re).and(im).map_collect(|&re, &im| re.hypot(im)))
            }
            (from, _) => Err(FlagError::UnsupportedConversion {
                from,
                to: R::Amplitude,
            }),
        }
    }
}

/// Linear combination `a·A + b·B` defining a Stokes parameter.
type StokesTerms = [(Polarization, Complex64); 2];

fn stokes_terms(target: Polarization, circular: bool) -> Option<StokesTerms> {
    use Polarization::*;

    let one = Complex64::new(1.0, 0.0);
    let i = Complex64::new(0.0, 1.0);
    let terms = match (target, circular) {
        (StokesI, false) => [(XX, one), (YY, one)],
        (StokesQ, false) => [(XX, one), (YY, -one)],
        (StokesU, false) => [(XY, one), (YX, one)],
        (StokesV, false) => [(XY, -i), (YX, i)],
        (StokesI, true) => [(RR, one), (LL, one)],
        (StokesQ, true) => [(RL, one), (LR, one)],
        (StokesU, true) => [(RL, -i), (LR, i)],
        (StokesV, true) => [(RR, one), (LL, -one)],
        _ => return None,
    };
    Some(terms)
}

/// Every polarization of one observation, all sharing one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeFrequencyData {
    images: Vec<PolarizedImage>,
}

impl TimeFrequencyData {
    /// Build from polarized images with distinct polarizations and a common
    /// shape.
    pub fn new(images: Vec<PolarizedImage>) -> Result<Self, FlagError> {
        let Some(first) = images.first() else {
            return Err(FlagError::InvalidConfig(
                "time-frequency data needs at least one polarization".to_string(),
            ));
        };
        let shape = first.shape();
        for (index, image) in images.iter().enumerate() {
            ensure_shape(shape, image.shape())?;
            if images[..index]
                .iter()
                .any(|other| other.polarization == image.polarization)
            {
                return Err(FlagError::InvalidConfig(format!(
                    "polarization {} appears more than once",
                    image.polarization
                )));
            }
        }
        Ok(Self { images })
    }

    /// Interpret an image set, applying `mask` (or no flags) to every
    /// polarization.
    pub fn from_image_set(
        set: &ImageSet,
        mask: Option<&Array2<bool>>,
    ) -> Result<Self, FlagError> {
        let mask = match mask {
            Some(mask) => {
                ensure_shape(set.shape(), mask.dim())?;
                mask.clone()
            }
            None => Array2::from_elem(set.shape(), false),
        };

        let buffers = set.images();
        let images = match buffers.len() {
            1 => vec![PolarizedImage::new_single(
                Polarization::StokesI,
                ComplexRepresentation::Amplitude,
                buffers[0].clone(),
                mask,
            )?],
            _ => set
                .polarizations()
                .into_iter()
                .zip(buffers.chunks_exact(2))
                .map(|(pol, pair)| {
                    let (real, imaginary) = (pair[0].clone(), pair[1].clone());
                    PolarizedImage::new_complex(pol, real, imaginary, mask.clone())
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Self::new(images)
    }

    /// `(channels, time_steps)`
    pub fn shape(&self) -> (usize, usize) {
        self.images[0].shape()
    }

    /// Stored polarizations, in storage order.
    pub fn polarizations(&self) -> Vec<Polarization> {
        self.images.iter().map(|image| image.polarization).collect()
    }

    pub fn polarized_images(&self) -> &[PolarizedImage] {
        &self.images
    }

    pub fn contains(&self, polarization: Polarization) -> bool {
        self.position(polarization).is_some()
    }

    pub fn polarization_data(&self, polarization: Polarization) -> Option<&PolarizedImage> {
        self.position(polarization).map(|index| &self.images[index])
    }

    fn position(&self, polarization: Polarization) -> Option<usize> {
        self.images
            .iter()
            .position(|image| image.polarization == polarization)
    }

    /// Unflag every polarization.
    pub fn clear_mask(&mut self) {
        for image in &mut self.images {
            image.clear_mask();
        }
    }

    /// The stored terms from which a missing Stokes parameter can be derived,
    /// preferring linear over circular feeds.
    fn derivation(&self, polarization: Polarization) -> Option<StokesTerms> {
        [false, true].into_iter().find_map(|circular| {
            stokes_terms(polarization, circular)
                .filter(|terms| terms.iter().all(|(source, _)| self.contains(*source)))
        })
    }

    /// Whether [`Self::convert_to_polarization`] can succeed for this label.
    pub fn can_provide(&self, polarization: Polarization) -> bool {
        if self.contains(polarization) {
            return true;
        }
        self.derivation(polarization).is_some_and(|terms| {
            terms.iter().all(|(source, _)| {
                self.polarization_data(*source).is_some_and(|image| {
                    image.representation == ComplexRepresentation::ComplexParts
                })
            })
        })
    }

    /// Polarizations whose masks receive the flags of `polarization`: itself
    /// when stored, its derivation sources otherwise.
    pub fn mask_targets(&self, polarization: Polarization) -> Result<Vec<Polarization>, FlagError> {
        if self.contains(polarization) {
            return Ok(vec![polarization]);
        }
        self.derivation(polarization)
            .map(|terms| terms.iter().map(|(source, _)| *source).collect())
            .ok_or(FlagError::UnknownPolarization(polarization))
    }

    /// Copy of a stored polarization, or a Stokes parameter synthesized from
    /// the stored complex products. A synthesized mask is the union of the
    /// source masks.
    pub fn convert_to_polarization(
        &self,
        polarization: Polarization,
    ) -> Result<PolarizedImage, FlagError> {
        if let Some(image) = self.polarization_data(polarization) {
            return Ok(image.clone());
        }
        let terms = self
            .derivation(polarization)
            .ok_or(FlagError::UnknownPolarization(polarization))?;

        let mut mask = Array2::from_elem(self.shape(), false);
        let mut values = Array2::<Complex64>::zeros(self.shape());
        for (source, coefficient) in terms {
            let image = self
                .polarization_data(source)
                .ok_or(FlagError::UnknownPolarization(source))?;
            let source_values = image.complex_values()?;
            Zip::from(&mut values)
                .and(&source_values)
                .for_each(|v, &s| *v += coefficient * s);
            join_into(&mut mask, image.mask.view())?;
        }

        PolarizedImage::new_complex(
            polarization,
            values.mapv(|v| v.re),
            values.mapv(|v| v.im),
            mask,
        )
    }

    /// Replace the data of a stored polarization.
    pub fn set_polarization_data(
        &mut self,
        polarization: Polarization,
        image: PolarizedImage,
    ) -> Result<(), FlagError> {
        let index = self
            .position(polarization)
            .ok_or(FlagError::UnknownPolarization(polarization))?;
        if image.polarization != polarization {
            return Err(FlagError::InvalidConfig(format!(
                "cannot store {} data as {polarization}",
                image.polarization
            )));
        }
        ensure_shape(self.shape(), image.shape())?;
        self.images[index] = image;
        Ok(())
    }

    /// OR the flags of `image` into the mask of `polarization`, or into the
    /// masks of its sources when it is derived.
    pub fn join_mask(
        &mut self,
        polarization: Polarization,
        image: &PolarizedImage,
    ) -> Result<(), FlagError> {
        for target in self.mask_targets(polarization)? {
            if let Some(index) = self.position(target) {
                join_into(&mut self.images[index].mask, image.mask.view())?;
            }
        }
        Ok(())
    }

    /// Union of all polarization masks.
    pub fn combined_mask(&self) -> Array2<bool> {
        let mut combined = Array2::from_elem(self.shape(), false);
        for image in &self.images {
            Zip::from(&mut combined)
                .and(&image.mask)
                .for_each(|c, &m| *c = *c || m);
        }
        combined
    }

    /// Set the same mask on every polarization.
    pub fn set_global_mask(&mut self, mask: &Array2<bool>) -> Result<(), FlagError> {
        ensure_shape(self.shape(), mask.dim())?;
        for image in &mut self.images {
            image.mask.assign(mask);
        }
        Ok(())
    }

    /// Mean amplitude over all polarizations.
    pub fn combined_amplitude(&self) -> Result<Array2<f64>, FlagError> {
        let mut sum = Array2::<f64>::zeros(self.shape());
        for image in &self.images {
            sum += &image.amplitude_image()?;
        }
        Ok(sum / self.images.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn complex_set() -> ImageSet {
        // Buffers: XX(re, im), XY, YX, YY with distinct constant values.
        let buffers = (0..8)
            .map(|i| Array2::from_elem((3, 4), i as f64 + 1.0))
            .collect();
        ImageSet::from_buffers(buffers).unwrap()
    }

    #[test]
    fn test_image_set_counts() {
        for count in [1, 2, 4, 8] {
            assert!(ImageSet::new(5, 3, count, 0.0).is_ok());
        }
        for count in [0, 3, 5, 16] {
            assert!(matches!(
                ImageSet::new(5, 3, count, 0.0),
                Err(FlagError::InvalidImageCount(c)) if c == count
            ));
        }
        assert!(ImageSet::new(0, 3, 1, 0.0).is_err());
        let mismatched = vec![Array2::zeros((3, 4)), Array2::zeros((4, 3))];
        assert!(ImageSet::from_buffers(mismatched).is_err());
    }

    #[test]
    fn test_layouts() {
        let single = TimeFrequencyData::from_image_set(&ImageSet::new(4, 3, 1, 1.0).unwrap(), None)
            .unwrap();
        assert_eq!(single.polarizations(), vec![Polarization::StokesI]);
        assert_eq!(
            single.polarized_images()[0].representation(),
            ComplexRepresentation::Amplitude
        );

        let dual = TimeFrequencyData::from_image_set(&ImageSet::new(4, 3, 4, 1.0).unwrap(), None)
            .unwrap();
        assert_eq!(dual.polarizations(), vec![Polarization::XX, Polarization::YY]);

        let full = TimeFrequencyData::from_image_set(&complex_set(), None).unwrap();
        assert_eq!(full.polarizations(), Polarization::LINEAR.to_vec());
        let xy = full.polarization_data(Polarization::XY).unwrap();
        assert_eq!(xy.images()[0][[0, 0]], 3.0);
        assert_eq!(xy.images()[1][[0, 0]], 4.0);
    }

    #[test]
    fn test_input_mask_applies_to_all() {
        let set = ImageSet::new(2, 2, 4, 0.0).unwrap();
        let mask = array![[true, false], [false, false]];
        let data = TimeFrequencyData::from_image_set(&set, Some(&mask)).unwrap();
        for image in data.polarized_images() {
            assert_eq!(image.mask(), &mask);
        }
        let wrong = Array2::from_elem((3, 2), false);
        assert!(TimeFrequencyData::from_image_set(&set, Some(&wrong)).is_err());
    }

    #[test]
    fn test_representation_conversions() {
        let image = PolarizedImage::new_complex(
            Polarization::XX,
            array![[3.0, 0.0]],
            array![[4.0, -1.0]],
            array![[false, true]],
        )
        .unwrap();

        let amplitude = image.to_representation(ComplexRepresentation::Amplitude).unwrap();
        assert_relative_eq!(amplitude.single_image().unwrap()[[0, 0]], 5.0);
        assert_eq!(amplitude.mask(), image.mask());

        let phase = image.to_representation(ComplexRepresentation::Phase).unwrap();
        assert_relative_eq!(
            phase.single_image().unwrap()[[0, 1]],
            -std::f64::consts::FRAC_PI_2
        );

        let imaginary = image.to_representation(ComplexRepresentation::Imaginary).unwrap();
        assert_eq!(imaginary.single_image().unwrap(), &array![[4.0, -1.0]]);

        let err = amplitude
            .to_representation(ComplexRepresentation::Phase)
            .unwrap_err();
        assert!(matches!(err, FlagError::UnsupportedConversion { .. }));
        assert!(amplitude
            .to_representation(ComplexRepresentation::Amplitude)
            .is_ok());
    }

    #[test]
    fn test_make_complex() {
        let mask = array![[false, false]];
        let real = PolarizedImage::new_single(
            Polarization::YY,
            ComplexRepresentation::Amplitude,
            array![[2.0, 3.0]],
            mask.clone(),
        )
        .unwrap();
        let complex = real.make_complex().unwrap();
        assert_eq!(complex.representation(), ComplexRepresentation::ComplexParts);
        assert_eq!(complex.images()[0], array![[2.0, 3.0]]);
        assert_eq!(complex.images()[1], array![[0.0, 0.0]]);

        let imaginary = PolarizedImage::new_single(
            Polarization::YY,
            ComplexRepresentation::Imaginary,
            array![[2.0, 3.0]],
            mask.clone(),
        )
        .unwrap();
        assert_eq!(imaginary.make_complex().unwrap().images()[1], array![[2.0, 3.0]]);

        let phase = PolarizedImage::new_single(
            Polarization::YY,
            ComplexRepresentation::Phase,
            array![[0.5, 0.5]],
            mask,
        )
        .unwrap();
        assert!(phase.make_complex().is_err());
        assert!(phase.amplitude_image().is_err());
    }

    #[test]
    fn test_stokes_from_linear() {
        let mut data = TimeFrequencyData::from_image_set(&complex_set(), None).unwrap();
        data.images[0].mask[[0, 0]] = true; // XX
        data.images[3].mask[[1, 1]] = true; // YY

        // XX = 1+2i, XY = 3+4i, YX = 5+6i, YY = 7+8i
        let i = data.convert_to_polarization(Polarization::StokesI).unwrap();
        assert_eq!(i.images()[0][[2, 3]], 8.0);
        assert_eq!(i.images()[1][[2, 3]], 10.0);
        assert!(i.mask()[[0, 0]] && i.mask()[[1, 1]]);

        let q = data.convert_to_polarization(Polarization::StokesQ).unwrap();
        assert_eq!(q.images()[0][[0, 0]], -6.0);
        assert_eq!(q.images()[1][[0, 0]], -6.0);

        let u = data.convert_to_polarization(Polarization::StokesU).unwrap();
        assert_eq!(u.images()[0][[0, 0]], 8.0);
        assert_eq!(u.images()[1][[0, 0]], 10.0);

        // V = -i (XY - YX) = -i (-2 - 2i) = -2 + 2i
        let v = data.convert_to_polarization(Polarization::StokesV).unwrap();
        assert_relative_eq!(v.images()[0][[0, 0]], -2.0);
        assert_relative_eq!(v.images()[1][[0, 0]], 2.0);
        assert!(!v.mask()[[0, 0]]);
    }

    #[test]
    fn test_stokes_from_circular() {
        let mask = Array2::from_elem((1, 1), false);
        let pol = |p, re: f64, im: f64| {
            PolarizedImage::new_complex(p, array![[re]], array![[im]], mask.clone()).unwrap()
        };
        let data = TimeFrequencyData::new(vec![
            pol(Polarization::RR, 1.0, 0.0),
            pol(Polarization::RL, 0.0, 1.0),
            pol(Polarization::LR, 2.0, 0.0),
            pol(Polarization::LL, 3.0, 0.0),
        ])
        .unwrap();

        let v = data.convert_to_polarization(Polarization::StokesV).unwrap();
        assert_eq!(v.images()[0][[0, 0]], -2.0);
        // U = i (LR - RL) = i (2 - i) = 1 + 2i
        let u = data.convert_to_polarization(Polarization::StokesU).unwrap();
        assert_relative_eq!(u.images()[0][[0, 0]], 1.0);
        assert_relative_eq!(u.images()[1][[0, 0]], 2.0);
    }

    #[test]
    fn test_unavailable_polarizations() {
        let dual = TimeFrequencyData::from_image_set(&ImageSet::new(4, 3, 4, 1.0).unwrap(), None)
            .unwrap();
        assert!(dual.can_provide(Polarization::StokesI));
        assert!(dual.can_provide(Polarization::StokesQ));
        assert!(!dual.can_provide(Polarization::StokesU));
        assert!(!dual.can_provide(Polarization::RR));
        assert!(matches!(
            dual.convert_to_polarization(Polarization::StokesV),
            Err(FlagError::UnknownPolarization(Polarization::StokesV))
        ));

        let single = TimeFrequencyData::from_image_set(&ImageSet::new(4, 3, 1, 1.0).unwrap(), None)
            .unwrap();
        assert!(single.can_provide(Polarization::StokesI));
        assert!(!single.can_provide(Polarization::StokesQ));
    }

    #[test]
    fn test_join_mask_into_sources() {
        let mut data = TimeFrequencyData::from_image_set(&complex_set(), None).unwrap();
        let mut stokes_u = data.convert_to_polarization(Polarization::StokesU).unwrap();
        stokes_u.mask_mut()[[2, 1]] = true;
        data.join_mask(Polarization::StokesU, &stokes_u).unwrap();

        assert!(data.polarization_data(Polarization::XY).unwrap().mask()[[2, 1]]);
        assert!(data.polarization_data(Polarization::YX).unwrap().mask()[[2, 1]]);
        assert!(!data.polarization_data(Polarization::XX).unwrap().mask()[[2, 1]]);
        assert_eq!(crate::image_proc::mask::flagged_count(data.combined_mask().view()), 1);
    }

    #[test]
    fn test_set_polarization_data() {
        let mut data = TimeFrequencyData::from_image_set(&complex_set(), None).unwrap();
        let mut yy = data.convert_to_polarization(Polarization::YY).unwrap();
        yy.mask_mut().fill(true);
        data.set_polarization_data(Polarization::YY, yy.clone()).unwrap();
        assert!(data.polarization_data(Polarization::YY).unwrap().mask().iter().all(|&m| m));
        assert!(data.set_polarization_data(Polarization::XX, yy).is_err());

        data.set_global_mask(&Array2::from_elem((3, 4), false)).unwrap();
        assert!(!data.combined_mask().iter().any(|&m| m));
    }

    #[test]
    fn test_combined_amplitude_and_residual() {
        let mut set = ImageSet::new(2, 1, 4, 0.0).unwrap();
        set.image_mut(0).unwrap().fill(3.0);
        set.image_mut(1).unwrap().fill(4.0);
        set.image_mut(2).unwrap().fill(1.0);
        let data = TimeFrequencyData::from_image_set(&set, None).unwrap();
        let combined = data.combined_amplitude().unwrap();
        assert_relative_eq!(combined[[0, 0]], 3.0);

        let amplitude = data.polarized_images()[0]
            .to_representation(ComplexRepresentation::Amplitude)
            .unwrap();
        let baseline = array![[1.0, 2.0]];
        let extra = array![[false, true]];
        let residual = amplitude.residual(baseline.view(), extra.view()).unwrap();
        assert_eq!(residual.single_image().unwrap(), &array![[4.0, 3.0]]);
        assert_eq!(residual.mask(), &extra);
    }
}
