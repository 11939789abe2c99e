//! PNG rendering of masks and flagged images.
//!
//! Pixel `(x, y)` shows time step `x` of channel `y`, so frequency runs down
//! the image.

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{ArrayView2, Zip};
use std::path::Path;

use crate::error::{ensure_shape, FlagError};

const FLAG_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

/// White where flagged, black elsewhere.
pub fn mask_to_gray_image(mask: ArrayView2<bool>) -> GrayImage {
    let (height, width) = mask.dim();
    let mut img = GrayImage::new(width as u32, height as u32);
    for ((y, x), &flagged) in mask.indexed_iter() {
        img.put_pixel(x as u32, y as u32, Luma([if flagged { 255 } else { 0 }]));
    }
    img
}

/// Grayscale image with flagged samples drawn in red.
///
/// Gray levels stretch linearly between the smallest and largest unflagged
/// finite sample.
pub fn flagged_image_to_rgb(
    image: ArrayView2<f64>,
    mask: ArrayView2<bool>,
) -> Result<RgbImage, FlagError> {
    ensure_shape(image.dim(), mask.dim())?;

    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    Zip::from(&image).and(&mask).for_each(|&v, &flagged| {
        if !flagged && v.is_finite() {
            low = low.min(v);
            high = high.max(v);
        }
    });
    let range = high - low;

    let (height, width) = image.dim();
    let mut img = RgbImage::new(width as u32, height as u32);
    for ((y, x), &value) in image.indexed_iter() {
        let pixel = if mask[[y, x]] {
            FLAG_COLOUR
        } else if value.is_finite() && range > 0.0 {
            let level = ((value - low) / range * 255.0).round() as u8;
            Rgb([level, level, level])
        } else {
            Rgb([0, 0, 0])
        };
        img.put_pixel(x as u32, y as u32, pixel);
    }
    Ok(img)
}

/// Write [`mask_to_gray_image`] as a PNG.
pub fn save_mask_png(mask: ArrayView2<bool>, path: &Path) -> Result<(), FlagError> {
    mask_to_gray_image(mask).save(path)?;
    Ok(())
}

/// Write [`flagged_image_to_rgb`] as a PNG.
pub fn save_flagged_png(
    image: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    path: &Path,
) -> Result<(), FlagError> {
    flagged_image_to_rgb(image, mask)?.save(path)?;
    Ok(())
}
