//! Edge hinting: find outlines on the working image and darken them.
//!
//! The detector is a Canny-style chain built from `imageproc` pieces:
//! Sobel gradients, non-maximum suppression, and hysteresis with the
//! fixed thresholds below. The binary edge map is thickened by one 3x3
//! dilation and subtracted at half intensity from every channel, which
//! gives sprites a darker silhouette.
//!
//! Unlike `imageproc::edges::canny` there is no built-in pre-blur (the
//! working image was just area-averaged) and the hysteresis walk checks
//! all 8 neighbours with explicit bounds checks, so edges touching the
//! image border are safe.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::distance_transform::Norm;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::types::RgbImage;

/// Hysteresis low threshold on L1 gradient magnitude.
pub const LOW_THRESHOLD: f32 = 60.0;

/// Hysteresis high threshold on L1 gradient magnitude.
pub const HIGH_THRESHOLD: f32 = 140.0;

/// Amount subtracted from each channel at an edge pixel (half of 255).
pub const EDGE_DARKEN: u8 = 255 / 2;

const EDGE: Luma<u8> = Luma([255]);

/// Binary edge map (255 = edge) of a grayscale image.
#[must_use = "returns the binary edge map"]
pub fn detect_edges(gray: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return GrayImage::new(w, h);
    }
    let high = high_threshold.max(0.0);
    let low = low_threshold.max(0.0).min(high);

    let gx: Image<Luma<i16>> = filter_clamped(gray, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(gray, kernel::SOBEL_VERTICAL_3X3);
    let magnitude = Image::<Luma<f32>>::from_fn(w, h, |x, y| {
        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([dx.abs() + dy.abs()])
    });

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, low, high)
}

/// Zero every pixel that is not a local maximum across the gradient.
fn non_maximum_suppression(
    g: &Image<Luma<f32>>,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Image<Luma<f32>> {
    let (w, h) = g.dimensions();
    let mut out = Image::from_pixel(w, h, Luma([0.0f32]));
    let at = |x: u32, y: u32| g.get_pixel(x, y).0[0];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let angle = {
                let a = f32::from(gy.get_pixel(x, y).0[0])
                    .atan2(f32::from(gx.get_pixel(x, y).0[0]))
                    .to_degrees();
                if a < 0.0 { a + 180.0 } else { a }
            };
            let (a, b) = if !(22.5..157.5).contains(&angle) {
                (at(x - 1, y), at(x + 1, y))
            } else if angle < 67.5 {
                (at(x + 1, y + 1), at(x - 1, y - 1))
            } else if angle < 112.5 {
                (at(x, y - 1), at(x, y + 1))
            } else {
                (at(x - 1, y + 1), at(x + 1, y - 1))
            };
            let m = at(x, y);
            if m >= a && m >= b {
                out.put_pixel(x, y, Luma([m]));
            }
        }
    }
    out
}

/// Keep strong edges and any weak edges connected to them.
fn hysteresis(input: &Image<Luma<f32>>, low: f32, high: f32) -> GrayImage {
    let (w, h) = input.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if input.get_pixel(x, y).0[0] < high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, EDGE);
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (Some(nx), Some(ny)) =
                        (cx.checked_add_signed(dx), cy.checked_add_signed(dy))
                    else {
                        continue;
                    };
                    if nx >= w || ny >= h {
                        continue;
                    }
                    if input.get_pixel(nx, ny).0[0] >= low && out.get_pixel(nx, ny).0[0] == 0 {
                        out.put_pixel(nx, ny, EDGE);
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Edge mask of `image`: grayscale, edge detection, one 3x3 dilation.
#[must_use = "returns the dilated edge mask"]
pub fn edge_mask(image: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    let edges = detect_edges(&gray, LOW_THRESHOLD, HIGH_THRESHOLD);
    imageproc::morphology::dilate(&edges, Norm::LInf, 1)
}

/// Subtract half the mask intensity from every channel, saturating at 0.
#[must_use = "returns the darkened image"]
pub fn darken_edges(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        let amount = m.0[0] / 2;
        for c in &mut pixel.0 {
            *c = c.saturating_sub(amount);
        }
    }
    out
}

/// Detect edges and darken them in one go, returning the mask alongside
/// the hinted image.
///
/// This is step 3 in the pipeline, between downscaling and dithering.
#[must_use]
pub fn hint_edges(image: &RgbImage) -> (RgbImage, GrayImage) {
    let mask = edge_mask(image);
    let hinted = darken_edges(image, &mask);
    (hinted, mask)
}
