//! Final unsharp mask.
//!
//! `out = 1.15 * x - 0.15 * blur(x)` with a 3x3 Gaussian. The blur is
//! taken as an exact integer sum (`[1, 2, 1]` outer product, weight 16)
//! through [`imageproc::filter::filter_clamped`], which replicates border
//! pixels, so the only rounding happens once at the end.

use image::Rgb;
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel::Kernel;

use crate::types::RgbImage;

/// Weight of the original image.
pub const SHARPEN_AMOUNT: f32 = 1.15;

/// `[1, 2, 1]` outer product; the weights sum to [`GAUSSIAN_WEIGHT`].
const GAUSSIAN_3X3: [i32; 9] = [1, 2, 1, 2, 4, 2, 1, 2, 1];
const GAUSSIAN_WEIGHT: f32 = 16.0;

/// Unsharp-mask `image`.
///
/// This is step 7, the last in the pipeline.
#[must_use = "returns the sharpened image"]
pub fn sharpen(image: &RgbImage) -> RgbImage {
    let blur_sum: Image<Rgb<i16>> = filter_clamped(image, Kernel::new(&GAUSSIAN_3X3, 3, 3));
    let blur_amount = SHARPEN_AMOUNT - 1.0;

    let mut out = image.clone();
    for (pixel, blurred) in out.pixels_mut().zip(blur_sum.pixels()) {
        for (c, &sum) in pixel.0.iter_mut().zip(blurred.0.iter()) {
            let blur = f32::from(sum) / GAUSSIAN_WEIGHT;
            let value = SHARPEN_AMOUNT.mul_add(f32::from(*c), -blur_amount * blur);
            // Clamped to [0, 255] before the cast.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let sharpened = value.round().clamp(0.0, 255.0) as u8;
            *c = sharpened;
        }
    }
    out
}
