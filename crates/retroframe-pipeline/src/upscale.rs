//! Nearest-neighbour resize back to the source geometry.

use image::imageops::{self, FilterType};

use crate::types::{Dimensions, RgbImage};

/// Blow `image` up to `target` by nearest-neighbour sampling, so each
/// working pixel becomes a crisp block.
///
/// This is step 6 in the pipeline, between quantization and sharpening.
#[must_use = "returns the upscaled image"]
pub fn upscale(image: &RgbImage, target: Dimensions) -> RgbImage {
    if Dimensions::of(image) == target {
        return image.clone();
    }
    imageops::resize(image, target.width, target.height, FilterType::Nearest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downsample::downscale;

    #[test]
    fn restores_source_geometry() {
        for (w, h) in [(640, 480), (333, 100), (1920, 1080), (7, 3)] {
            let source = RgbImage::new(w, h);
            let small = downscale(&source, 240);
            let back = upscale(&small, Dimensions::of(&source));
            assert_eq!(back.dimensions(), (w, h));
        }
    }

    #[test]
    fn pixels_become_blocks() {
        let small = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([10, 20, 30])
            } else {
                image::Rgb([200, 210, 220])
            }
        });
        let big = upscale(
            &small,
            Dimensions {
                width: 8,
                height: 4,
            },
        );
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(big.get_pixel(x, y).0, [10, 20, 30]);
            }
            for x in 4..8 {
                assert_eq!(big.get_pixel(x, y).0, [200, 210, 220]);
            }
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn no_new_colors_are_introduced() {
        let small = RgbImage::from_fn(5, 4, |x, y| image::Rgb([(x * 50) as u8, (y * 60) as u8, 7]));
        let big = upscale(
            &small,
            Dimensions {
                width: 23,
                height: 17,
            },
        );
        let palette: std::collections::HashSet<[u8; 3]> = small.pixels().map(|p| p.0).collect();
        assert!(big.pixels().all(|p| palette.contains(&p.0)));
    }
}
