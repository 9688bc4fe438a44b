//! Palette reduction by k-means clustering in RGB space.
//!
//! Pixels are treated as points in a 3-D float color space. Each attempt
//! seeds K centroids with k-means++ and runs Lloyd iterations until no
//! centroid moves more than [`EPSILON`] or [`MAX_ITERATIONS`] is reached.
//! Out of [`ATTEMPTS`] independent runs the one with the lowest total
//! squared distortion wins (ties go to the earliest run), and every pixel
//! is replaced by its centroid color.
//!
//! All randomness comes from one `StdRng`. A fixed seed makes the palette
//! reproducible; `None` seeds from the OS.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{PipelineError, RgbImage};

/// Independent clustering runs per call.
pub const ATTEMPTS: u32 = 3;

/// Lloyd iteration cap per attempt.
pub const MAX_ITERATIONS: u32 = 30;

/// Convergence threshold on the largest centroid move (RGB units).
pub const EPSILON: f32 = 1.0;

type Color = [f32; 3];

fn distance_squared(a: &Color, b: &Color) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    db.mul_add(db, dr.mul_add(dr, dg * dg))
}

/// A centroid and the pixels currently assigned to it.
#[derive(Debug, Clone)]
struct PaletteCluster {
    centroid: Color,
    members: Vec<usize>,
}

impl PaletteCluster {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn recompute_centroid(&mut self, points: &[Color]) {
        if self.members.is_empty() {
            return;
        }
        let mut sum = [0.0f64; 3];
        for &i in &self.members {
            for (s, &v) in sum.iter_mut().zip(points[i].iter()) {
                *s += f64::from(v);
            }
        }
        let n = self.members.len() as f64;
        self.centroid = sum.map(|s| (s / n) as f32);
    }
}

/// Outcome of one clustering attempt.
#[derive(Debug, Clone)]
struct Clustering {
    centroids: Vec<Color>,
    labels: Vec<usize>,
    distortion: f64,
}

/// A quantized image and the palette it was drawn from.
#[derive(Debug, Clone)]
pub struct Quantized {
    /// Image whose pixels are all palette entries.
    pub image: RgbImage,
    /// One color per cluster. May hold duplicates or unused entries when
    /// the image has fewer distinct colors than K.
    pub palette: Vec<[u8; 3]>,
}

/// k-means++ seeding: first centroid uniform, the rest drawn with
/// probability proportional to squared distance from the nearest
/// centroid chosen so far.
fn seed_centroids(points: &[Color], k: usize, rng: &mut StdRng) -> Vec<Color> {
    let n = points.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..n)]);
    let mut nearest: Vec<f32> = points
        .iter()
        .map(|p| distance_squared(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().map(|&d| f64::from(d)).sum();
        let chosen = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            nearest
                .iter()
                .position(|&d| {
                    acc += f64::from(d);
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            // Every point already coincides with a centroid.
            rng.random_range(0..n)
        };
        let centroid = points[chosen];
        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(distance_squared(p, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

/// Label every point with its nearest centroid (first wins on ties) and
/// return the total squared distance.
fn assign(points: &[Color], centroids: &[Color], labels: &mut [usize]) -> f64 {
    let mut total = 0.0;
    for (label, p) in labels.iter_mut().zip(points) {
        let mut best = 0;
        let mut best_d = f32::INFINITY;
        for (j, c) in centroids.iter().enumerate() {
            let d = distance_squared(p, c);
            if d < best_d {
                best = j;
                best_d = d;
            }
        }
        *label = best;
        total += f64::from(best_d);
    }
    total
}

/// Group points by label and move each centroid to its members' mean.
/// Empty clusters keep their previous centroid.
fn gather(points: &[Color], labels: &[usize], previous: &[Color]) -> Vec<PaletteCluster> {
    let mut clusters: Vec<PaletteCluster> = previous
        .iter()
        .map(|&centroid| PaletteCluster {
            centroid,
            members: Vec::new(),
        })
        .collect();
    for (i, &label) in labels.iter().enumerate() {
        clusters[label].members.push(i);
    }
    for cluster in &mut clusters {
        cluster.recompute_centroid(points);
    }
    clusters
}

/// Give each empty cluster the point lying farthest from its own
/// centroid, taken from a cluster that can spare a member.
fn fill_empty_clusters(points: &[Color], clusters: &mut [PaletteCluster], labels: &mut [usize]) {
    for empty in 0..clusters.len() {
        if !clusters[empty].members.is_empty() {
            continue;
        }
        let donor = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.members.len() > 1)
            .flat_map(|(ci, c)| {
                c.members
                    .iter()
                    .enumerate()
                    .map(move |(slot, &i)| (ci, slot, distance_squared(&points[i], &c.centroid)))
            })
            .max_by(|a, b| a.2.total_cmp(&b.2));
        let Some((from, slot, _)) = donor else {
            return;
        };
        let point = clusters[from].members.swap_remove(slot);
        clusters[from].recompute_centroid(points);
        clusters[empty].members.push(point);
        clusters[empty].centroid = points[point];
        labels[point] = empty;
    }
}

/// One full k-means run from a fresh seeding.
fn cluster_once(points: &[Color], k: usize, rng: &mut StdRng) -> Clustering {
    let mut centroids = seed_centroids(points, k, rng);
    let mut labels = vec![0; points.len()];

    for _ in 0..MAX_ITERATIONS {
        assign(points, &centroids, &mut labels);
        let mut clusters = gather(points, &labels, &centroids);
        fill_empty_clusters(points, &mut clusters, &mut labels);

        let shift = clusters
            .iter()
            .zip(&centroids)
            .map(|(c, old)| distance_squared(&c.centroid, old))
            .fold(0.0f32, f32::max)
            .sqrt();
        centroids = clusters.into_iter().map(|c| c.centroid).collect();
        if shift <= EPSILON {
            break;
        }
    }

    let distortion = assign(points, &centroids, &mut labels);
    Clustering {
        centroids,
        labels,
        distortion,
    }
}

/// Lowest distortion wins; on a tie the earliest attempt is kept.
fn best_attempt(attempts: impl IntoIterator<Item = Clustering>) -> Option<Clustering> {
    attempts.into_iter().fold(None, |best, candidate| match best {
        Some(b) if b.distortion <= candidate.distortion => Some(b),
        _ => Some(candidate),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_rgb8(c: &Color) -> [u8; 3] {
    // Clamped to [0, 255] before the cast.
    c.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Reduce `image` to at most `k` colors.
///
/// This is step 5 in the pipeline, between dithering and upscaling.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `k < 2`.
pub fn quantize(image: &RgbImage, k: u32, seed: Option<u64>) -> Result<Quantized, PipelineError> {
    if k < 2 {
        return Err(PipelineError::InvalidConfig(format!(
            "palette_colors must be at least 2, got {k}"
        )));
    }
    let points: Vec<Color> = image
        .pixels()
        .map(|p| p.0.map(f32::from))
        .collect();
    if points.is_empty() {
        return Ok(Quantized {
            image: image.clone(),
            palette: Vec::new(),
        });
    }

    let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
    let best = best_attempt((0..ATTEMPTS).map(|_| cluster_once(&points, k as usize, &mut rng)))
        .ok_or_else(|| PipelineError::InvalidConfig("no clustering attempts".to_string()))?;

    let palette: Vec<[u8; 3]> = best.centroids.iter().map(to_rgb8).collect();
    let raw: Vec<u8> = best.labels.iter().flat_map(|&l| palette[l]).collect();
    let quantized = RgbImage::from_raw(image.width(), image.height(), raw).ok_or(
        PipelineError::BufferSize {
            expected: points.len() * 3,
            actual: best.labels.len() * 3,
        },
    )?;

    tracing::debug!(
        k,
        distortion = best.distortion,
        "palette quantization finished"
    );

    Ok(Quantized {
        image: quantized,
        palette,
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn distinct_colors(image: &RgbImage) -> HashSet<[u8; 3]> {
        image.pixels().map(|p| p.0).collect()
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }

    #[test]
    fn palette_of_one_is_rejected() {
        let img = RgbImage::new(4, 4);
        assert!(matches!(
            quantize(&img, 1, Some(1)),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(quantize(&img, 0, Some(1)).is_err());
    }

    #[test]
    fn two_flat_regions_are_recovered_exactly() {
        let img = RgbImage::from_fn(10, 6, |x, _| {
            if x < 5 {
                image::Rgb([200, 30, 30])
            } else {
                image::Rgb([20, 40, 220])
            }
        });
        let q = quantize(&img, 2, Some(7)).unwrap();
        assert_eq!(q.image, img);
        let palette: HashSet<[u8; 3]> = q.palette.into_iter().collect();
        assert_eq!(
            palette,
            HashSet::from([[200, 30, 30], [20, 40, 220]])
        );
    }

    #[test]
    fn output_never_exceeds_k_colors() {
        let img = gradient(48, 32);
        for k in [2, 4, 8, 16] {
            let q = quantize(&img, k, Some(3)).unwrap();
            assert!(
                distinct_colors(&q.image).len() <= k as usize,
                "k={k}: got {} colors",
                distinct_colors(&q.image).len()
            );
            assert_eq!(q.palette.len(), k as usize);
            assert_eq!(q.image.dimensions(), img.dimensions());
        }
    }

    #[test]
    fn every_output_pixel_is_a_palette_entry() {
        let img = gradient(30, 20);
        let q = quantize(&img, 5, Some(11)).unwrap();
        let palette: HashSet<[u8; 3]> = q.palette.iter().copied().collect();
        for p in q.image.pixels() {
            assert!(palette.contains(&p.0));
        }
    }

    #[test]
    fn uniform_image_does_not_crash() {
        let img = RgbImage::from_pixel(24, 18, image::Rgb([128, 128, 128]));
        let q = quantize(&img, 16, Some(0)).unwrap();
        assert_eq!(q.image, img);
    }

    #[test]
    fn more_clusters_than_pixels_is_tolerated() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let q = quantize(&img, 5, Some(2)).unwrap();
        assert_eq!(q.image, img);
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let img = gradient(40, 30);
        let a = quantize(&img, 6, Some(42)).unwrap();
        let b = quantize(&img, 6, Some(42)).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.palette, b.palette);
    }

    #[test]
    fn unseeded_run_still_respects_bound() {
        let img = gradient(20, 20);
        let q = quantize(&img, 3, None).unwrap();
        assert!(distinct_colors(&q.image).len() <= 3);
    }

    #[test]
    fn seeding_picks_distinct_points_when_available() {
        let points: Vec<Color> = vec![[0.0; 3], [255.0; 3], [0.0, 255.0, 0.0]];
        let mut rng = StdRng::seed_from_u64(5);
        let centroids = seed_centroids(&points, 3, &mut rng);
        let unique: HashSet<[u32; 3]> = centroids
            .iter()
            .map(|c| c.map(|v| v as u32))
            .collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn empty_cluster_takes_farthest_point() {
        let points: Vec<Color> = vec![[0.0; 3], [10.0; 3], [200.0; 3]];
        let mut labels = vec![0, 0, 0];
        let mut clusters = gather(&points, &labels, &[[70.0; 3], [255.0; 3]]);
        assert!(clusters[1].members.is_empty());
        fill_empty_clusters(&points, &mut clusters, &mut labels);
        assert_eq!(clusters[1].members, vec![2]);
        assert_eq!(clusters[1].centroid, [200.0; 3]);
        assert_eq!(labels, vec![0, 0, 1]);
        assert_eq!(clusters[0].centroid, [5.0; 3]);
    }

    #[test]
    fn ties_keep_the_earliest_attempt() {
        let attempt = |tag: usize, distortion: f64| Clustering {
            centroids: Vec::new(),
            labels: vec![tag],
            distortion,
        };
        let best = best_attempt([attempt(0, 5.0), attempt(1, 3.0), attempt(2, 3.0)]).unwrap();
        assert_eq!(best.labels, vec![1]);
        assert!(best_attempt(std::iter::empty()).is_none());
    }

    #[test]
    fn clustering_converges_on_separated_blobs() {
        let mut points = Vec::new();
        for base in [[10.0f32, 10.0, 10.0], [128.0, 200.0, 40.0], [240.0, 20.0, 200.0]] {
            for d in 0..5u8 {
                let d = f32::from(d);
                points.push([base[0] + d, base[1] - d, base[2] + d]);
            }
        }
        let mut rng = StdRng::seed_from_u64(9);
        let result = cluster_once(&points, 3, &mut rng);
        // Each blob spans +-2 around its mean on three axes.
        assert!(result.distortion < 3.0 * 5.0 * 3.0 * 4.0 + 1.0);
        let groups: HashSet<usize> = result.labels.iter().copied().collect();
        assert_eq!(groups.len(), 3);
    }
}
