//! Luma contrast boost in YCrCb space.
//!
//! Only the luma channel is stretched (`1.10 * Y + 4`), so hues and
//! saturation are left alone while the image gets a little more punch
//! before palette reduction.

use crate::types::RgbImage;

/// Luma gain applied by [`adjust_contrast`].
pub const LUMA_GAIN: f32 = 1.10;

/// Luma offset applied by [`adjust_contrast`].
pub const LUMA_OFFSET: f32 = 4.0;

/// BT.601 RGB to `(Y, Cr, Cb)`, chroma centred on 128.
fn to_ycrcb([r, g, b]: [u8; 3]) -> (f32, f32, f32) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g));
    let cr = (r - y).mul_add(0.713, 128.0);
    let cb = (b - y).mul_add(0.564, 128.0);
    (y, cr, cb)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    // Clamped to [0, 255] before the cast.
    value.round().clamp(0.0, 255.0) as u8
}

/// Inverse of [`to_ycrcb`], rounded and clamped to 8-bit.
fn from_ycrcb(y: f32, cr: f32, cb: f32) -> [u8; 3] {
    let dcr = cr - 128.0;
    let dcb = cb - 128.0;
    [
        to_u8(1.403f32.mul_add(dcr, y)),
        to_u8((-0.344f32).mul_add(dcb, (-0.714f32).mul_add(dcr, y))),
        to_u8(1.773f32.mul_add(dcb, y)),
    ]
}

/// Apply `luma' = clamp(1.10 * luma + 4, 0, 255)` to every pixel.
///
/// This is step 1 in the pipeline, before downscaling.
#[must_use = "returns the contrast-adjusted image"]
pub fn adjust_contrast(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let (y, cr, cb) = to_ycrcb(pixel.0);
        let boosted = LUMA_GAIN.mul_add(y, LUMA_OFFSET).clamp(0.0, 255.0);
        pixel.0 = from_ycrcb(boosted, cr, cb);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_stays_gray_and_brightens() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([128, 128, 128]));
        let out = adjust_contrast(&img);
        // 1.10 * 128 + 4 = 144.8
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [145, 145, 145]);
        }
    }

    #[test]
    fn white_saturates() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
        let out = adjust_contrast(&img);
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn black_gets_offset() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 0]));
        let out = adjust_contrast(&img);
        assert_eq!(out.get_pixel(0, 0).0, [4, 4, 4]);
    }

    #[test]
    fn color_keeps_dominant_channel() {
        let img = RgbImage::from_pixel(1, 1, image::Rgb([200, 40, 40]));
        let [r, g, b] = adjust_contrast(&img).get_pixel(0, 0).0;
        assert!(r > g && r > b, "expected red to dominate, got {r},{g},{b}");
        // Chroma is untouched, so g and b shift together.
        assert!(
            (i16::from(g) - i16::from(b)).abs() <= 1,
            "expected g ~ b, got {g},{b}"
        );
    }

    #[test]
    fn dimensions_preserved() {
        let img = RgbImage::new(17, 31);
        let out = adjust_contrast(&img);
        assert_eq!(out.dimensions(), (17, 31));
    }

    #[test]
    fn ycrcb_round_trip_is_close() {
        for rgb in [[10u8, 200, 90], [255, 0, 128], [33, 33, 34]] {
            let (y, cr, cb) = to_ycrcb(rgb);
            let back = from_ycrcb(y, cr, cb);
            for c in 0..3 {
                let diff = (i16::from(back[c]) - i16::from(rgb[c])).abs();
                assert!(diff <= 2, "channel {c}: {rgb:?} -> {back:?}");
            }
        }
    }
}
