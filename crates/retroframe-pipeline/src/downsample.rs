//! Area-averaged resize to the low working resolution.
//!
//! Every output pixel is the coverage-weighted mean of the source pixels
//! its footprint overlaps, which keeps fine texture from aliasing into
//! moiré when a photo is shrunk to handheld resolution. The stage always
//! runs, even when the target width equals the source width (the result
//! is then an exact copy).

use crate::types::{Dimensions, RgbImage};

/// Working geometry for a source image: `target_width` wide, height
/// scaled by the same factor and rounded, never below 1.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn working_dimensions(source: Dimensions, target_width: u32) -> Dimensions {
    let scale = f64::from(target_width) / f64::from(source.width.max(1));
    // Clamped to [1, u32::MAX] before the cast.
    let height = (f64::from(source.height) * scale)
        .round()
        .clamp(1.0, f64::from(u32::MAX)) as u32;
    Dimensions {
        width: target_width,
        height,
    }
}

/// Source pixels (index, coverage) contributing to each output index
/// along one axis.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn axis_coverage(src_len: u32, dst_len: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = f64::from(src_len) / f64::from(dst_len);
    (0..dst_len)
        .map(|d| {
            let start = f64::from(d) * scale;
            let end = (start + scale).min(f64::from(src_len));
            let mut taps = Vec::new();
            let mut s = start.floor();
            while s < end {
                let overlap = (s + 1.0).min(end) - s.max(start);
                if overlap > 1e-9 {
                    taps.push((s as u32, overlap));
                }
                s += 1.0;
            }
            taps
        })
        .collect()
}

/// Resize `image` to `target` with area averaging.
///
/// Zero-sized targets are bumped to 1 pixel on that axis.
///
/// This is step 2 in the pipeline, between contrast adjustment and
/// edge hinting.
#[must_use = "returns the resized image"]
pub fn area_downscale(image: &RgbImage, target: Dimensions) -> RgbImage {
    let (dst_w, dst_h) = (target.width.max(1), target.height.max(1));
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::new(dst_w, dst_h);
    }
    let columns = axis_coverage(image.width(), dst_w);
    let rows = axis_coverage(image.height(), dst_h);

    RgbImage::from_fn(dst_w, dst_h, |x, y| {
        let mut acc = [0.0f64; 3];
        let mut total = 0.0;
        for &(sy, wy) in &rows[y as usize] {
            for &(sx, wx) in &columns[x as usize] {
                let w = wx * wy;
                let p = image.get_pixel(sx, sy).0;
                for (a, &v) in acc.iter_mut().zip(p.iter()) {
                    *a += w * f64::from(v);
                }
                total += w;
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let channel = |sum: f64| (sum / total).round().clamp(0.0, 255.0) as u8;
        image::Rgb([channel(acc[0]), channel(acc[1]), channel(acc[2])])
    })
}

/// Shrink `image` to `target_width`, keeping the aspect ratio.
#[must_use = "returns the resized image"]
pub fn downscale(image: &RgbImage, target_width: u32) -> RgbImage {
    let target = working_dimensions(Dimensions::of(image), target_width);
    area_downscale(image, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn working_height_follows_aspect_ratio() {
        assert_eq!(working_dimensions(dims(1920, 1080), 240), dims(240, 135));
        assert_eq!(working_dimensions(dims(640, 480), 240), dims(240, 180));
    }

    #[test]
    fn working_height_rounds() {
        // 100 * 240 / 333 = 72.07
        assert_eq!(working_dimensions(dims(333, 100), 240).height, 72);
        // 101 * 10 / 20 = 50.5 rounds away from zero
        assert_eq!(working_dimensions(dims(20, 101), 10).height, 51);
    }

    #[test]
    fn working_height_never_zero() {
        assert_eq!(working_dimensions(dims(10_000, 2), 240).height, 1);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn unit_scale_is_exact_copy() {
        let img = RgbImage::from_fn(240, 135, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let out = downscale(&img, 240);
        assert_eq!(out, img);
    }

    #[test]
    fn halving_averages_two_by_two_blocks() {
        // Checkerboard of 0 and 200 averages to 100 everywhere.
        let img = RgbImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([200, 200, 200])
            }
        });
        let out = downscale(&img, 4);
        assert_eq!(out.dimensions(), (4, 4));
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [100, 100, 100]);
        }
    }

    #[test]
    fn fractional_footprint_weights_partial_pixels() {
        // 3 -> 2 columns: output 0 covers src 0 fully and src 1 by half.
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([0, 0, 0]),
            1 => image::Rgb([90, 90, 90]),
            _ => image::Rgb([180, 180, 180]),
        });
        let out = area_downscale(&img, dims(2, 1));
        // (0 * 1 + 90 * 0.5) / 1.5 = 30
        assert_eq!(out.get_pixel(0, 0).0, [30, 30, 30]);
        // (90 * 0.5 + 180 * 1) / 1.5 = 150
        assert_eq!(out.get_pixel(1, 0).0, [150, 150, 150]);
    }

    #[test]
    fn uniform_image_stays_uniform() {
        let img = RgbImage::from_pixel(641, 479, image::Rgb([12, 130, 250]));
        let out = downscale(&img, 240);
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [12, 130, 250]);
        }
    }

    #[test]
    fn coverage_sums_to_scale() {
        for (src, dst) in [(640u32, 240u32), (7, 3), (5, 5), (3, 8)] {
            let scale = f64::from(src) / f64::from(dst);
            for taps in axis_coverage(src, dst) {
                let sum: f64 = taps.iter().map(|&(_, w)| w).sum();
                assert!((sum - scale.min(f64::from(src))).abs() < 1e-6);
            }
        }
    }
}
