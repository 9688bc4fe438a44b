//! Ordered (Bayer) dithering, split across worker threads.
//!
//! Each pixel gets a fixed offset taken from an 8x8 threshold table tiled
//! over the image, so later palette quantization turns smooth gradients
//! into a regular cross-hatch instead of flat bands. The offset depends
//! only on `(x mod 8, y mod 8)` and the strength, never on neighbouring
//! pixels, so the image can be cut into independent tiles.
//!
//! # Concurrency
//!
//! The output buffer is carved into one set of row slices per tile with
//! `split_at_mut`, and each worker receives only its own slices. Tiles
//! never overlap, so no locking is involved. Workers run on scoped
//! threads and the caller blocks until every one of them has finished.
//!
//! Starting a worker can fail (the OS may refuse a new thread). In that
//! case [`ordered_dither_with`] logs a warning and returns the undithered
//! image for the whole call; the pipeline carries on.
//!
//! [`ordered_dither_reference`] is a plain single-threaded loop. Every
//! grid must reproduce its output byte for byte.

use std::io;
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::types::{Dimensions, DitherGrid, DitherOutcome, RgbImage};

/// Immutable 8x8 threshold table with entries in `0..=63`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DitherMatrix([[u8; 8]; 8]);

impl DitherMatrix {
    /// The classic recursive Bayer 8x8 table.
    pub const BAYER_8X8: Self = Self([
        [0, 48, 12, 60, 3, 51, 15, 63],
        [32, 16, 44, 28, 35, 19, 47, 31],
        [8, 56, 4, 52, 11, 59, 7, 55],
        [40, 24, 36, 20, 43, 27, 39, 23],
        [2, 50, 14, 62, 1, 49, 13, 61],
        [34, 18, 46, 30, 33, 17, 45, 29],
        [10, 58, 6, 54, 9, 57, 5, 53],
        [42, 26, 38, 22, 41, 25, 37, 21],
    ]);

    /// Largest allowed threshold value.
    pub const MAX_THRESHOLD: u8 = 63;

    /// Build a custom table. Returns `None` if any entry exceeds
    /// [`Self::MAX_THRESHOLD`].
    #[must_use]
    pub fn new(table: [[u8; 8]; 8]) -> Option<Self> {
        table
            .iter()
            .flatten()
            .all(|&t| t <= Self::MAX_THRESHOLD)
            .then_some(Self(table))
    }

    /// Threshold for pixel `(x, y)`, tiled cyclically.
    #[must_use]
    pub const fn threshold(&self, x: u32, y: u32) -> u8 {
        self.0[(y % 8) as usize][(x % 8) as usize]
    }

    /// Per-cell channel offsets for `strength`.
    #[must_use]
    pub fn offsets(&self, strength: u32) -> OffsetTable {
        let mut table = [[0i16; 8]; 8];
        for (row, thresholds) in table.iter_mut().zip(self.0.iter()) {
            for (cell, &t) in row.iter_mut().zip(thresholds.iter()) {
                *cell = threshold_offset(t, strength);
            }
        }
        OffsetTable(table)
    }
}

impl Default for DitherMatrix {
    fn default() -> Self {
        Self::BAYER_8X8
    }
}

/// `round((t - 31.5) / 63 * strength)`, limited to one full channel swing.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn threshold_offset(threshold: u8, strength: u32) -> i16 {
    let normalized = (f32::from(threshold) - 31.5) / 63.0;
    // Float-to-int casts saturate; the clamp keeps the value in i16 range.
    ((normalized * strength as f32).round() as i32).clamp(-255, 255) as i16
}

/// Channel offsets for each cell of a [`DitherMatrix`] at one strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTable([[i16; 8]; 8]);

impl OffsetTable {
    /// Offset for pixel `(x, y)`.
    #[must_use]
    pub const fn at(&self, x: u32, y: u32) -> i16 {
        self.0[(y % 8) as usize][(x % 8) as usize]
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn apply_offset(pixel: &mut [u8], offset: i16) {
    for channel in pixel {
        // Clamped to [0, 255] before the cast.
        *channel = (i16::from(*channel) + offset).clamp(0, 255) as u8;
    }
}

/// Half-open pixel window `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First column.
    pub x0: u32,
    /// One past the last column.
    pub x1: u32,
    /// First row.
    pub y0: u32,
    /// One past the last row.
    pub y1: u32,
}

impl Region {
    /// Whether `(x, y)` lies inside the region.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn area(&self) -> u64 {
        (self.x1 - self.x0) as u64 * (self.y1 - self.y0) as u64
    }
}

/// Boundaries `k * len / parts` for `k` in `0..=parts`.
#[allow(clippy::cast_possible_truncation)]
fn split_points(len: u32, parts: u32) -> Vec<u32> {
    let parts = parts.max(1);
    // k * len / parts <= len, so the cast back is lossless.
    (0..=parts)
        .map(|k| (u64::from(k) * u64::from(len) / u64::from(parts)) as u32)
        .collect()
}

/// Tile regions for `grid` over `dims`, row-major.
///
/// The default 2x2 grid puts the split at `width / 2` and `height / 2`
/// (integer division), so a 5x3 image yields a 2x1 top-left quadrant and
/// a 3x2 bottom-right one. Tiles may be empty when the grid is larger
/// than the image.
#[must_use]
pub fn partition(dims: Dimensions, grid: DitherGrid) -> Vec<Region> {
    let cols = split_points(dims.width, grid.columns);
    let rows = split_points(dims.height, grid.rows);
    rows.windows(2)
        .flat_map(|r| {
            cols.windows(2).map(move |c| Region {
                x0: c[0],
                x1: c[1],
                y0: r[0],
                y1: r[1],
            })
        })
        .collect()
}

/// A worker's exclusive share of the output buffer.
struct Tile<'a> {
    region: Region,
    rows: Vec<&'a mut [u8]>,
}

/// Carve `buf` (row-major RGB, `width` pixels per row) into one [`Tile`]
/// per grid cell.
fn split_tiles(buf: &mut [u8], dims: Dimensions, grid: DitherGrid) -> Vec<Tile<'_>> {
    let col_bounds = split_points(dims.width, grid.columns);
    let row_bounds = split_points(dims.height, grid.rows);
    let columns = col_bounds.len() - 1;

    let mut tiles: Vec<Tile<'_>> = partition(dims, grid)
        .into_iter()
        .map(|region| Tile {
            region,
            rows: Vec::with_capacity((region.y1 - region.y0) as usize),
        })
        .collect();

    let stride = dims.width as usize * 3;
    if stride == 0 {
        return tiles;
    }
    let mut band = 0;
    for (y, row) in buf.chunks_exact_mut(stride).enumerate() {
        while y >= row_bounds[band + 1] as usize {
            band += 1;
        }
        let mut rest = row;
        for (c, bounds) in col_bounds.windows(2).enumerate() {
            let len = (bounds[1] - bounds[0]) as usize * 3;
            let (cell, tail) = std::mem::take(&mut rest).split_at_mut(len);
            tiles[band * columns + c].rows.push(cell);
            rest = tail;
        }
    }
    tiles
}

fn dither_tile(tile: Tile<'_>, offsets: &OffsetTable) {
    let Tile { region, rows } = tile;
    for (y, row) in (region.y0..).zip(rows) {
        for (x, pixel) in (region.x0..).zip(row.chunks_exact_mut(3)) {
            apply_offset(pixel, offsets.at(x, y));
        }
    }
}

/// Starts dither workers. Implementations decide how a worker thread is
/// created and report failure to start as an `io::Error`.
pub trait WorkerLauncher {
    /// Start `work` as worker number `index` inside `scope`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the worker could not be started.
    fn launch<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        work: F,
    ) -> io::Result<ScopedJoinHandle<'scope, ()>>
    where
        F: FnOnce() + Send + 'scope;
}

/// Launches each worker on a named scoped OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLauncher;

impl WorkerLauncher for ThreadLauncher {
    fn launch<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        work: F,
    ) -> io::Result<ScopedJoinHandle<'scope, ()>>
    where
        F: FnOnce() + Send + 'scope,
    {
        thread::Builder::new()
            .name(format!("dither-{index}"))
            .spawn_scoped(scope, work)
    }
}

/// A dither worker could not be started.
#[derive(Debug, thiserror::Error)]
#[error("failed to launch dither worker {worker}: {source}")]
pub struct LaunchError {
    /// Index of the worker that failed to start.
    pub worker: usize,
    /// Underlying OS error.
    #[source]
    pub source: io::Error,
}

/// Single-threaded ordered dither. The oracle for every parallel split.
#[must_use = "returns the dithered image"]
pub fn ordered_dither_reference(
    image: &RgbImage,
    matrix: &DitherMatrix,
    strength: u32,
) -> RgbImage {
    let offsets = matrix.offsets(strength);
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        apply_offset(&mut pixel.0, offsets.at(x, y));
    }
    out
}

/// Dither `image` with one worker per non-empty grid tile and return the
/// image with the number of workers launched.
fn dither_tiles<L: WorkerLauncher>(
    image: &RgbImage,
    matrix: &DitherMatrix,
    strength: u32,
    grid: DitherGrid,
    launcher: &L,
) -> Result<(RgbImage, u32), LaunchError> {
    let offsets = matrix.offsets(strength);
    let dims = Dimensions::of(image);
    let mut out = image.clone();

    let launched = thread::scope(|scope| {
        let mut launched = 0;
        let tiles = split_tiles(&mut out, dims, grid);
        for (index, tile) in tiles.into_iter().enumerate() {
            if tile.region.area() == 0 {
                continue;
            }
            let offsets = &offsets;
            launcher
                .launch(scope, index, move || dither_tile(tile, offsets))
                .map_err(|source| LaunchError {
                    worker: index,
                    source,
                })?;
            launched += 1;
        }
        Ok::<u32, LaunchError>(launched)
    })?;

    Ok((out, launched))
}

/// Dither `image` with one worker per grid tile.
///
/// Tiles that cover no pixels get no worker. Blocks until every launched
/// worker has finished.
///
/// # Errors
///
/// Returns [`LaunchError`] if any worker fails to start. Workers that did
/// start still run to completion, but their output is discarded.
pub fn try_dither_parallel<L: WorkerLauncher>(
    image: &RgbImage,
    matrix: &DitherMatrix,
    strength: u32,
    grid: DitherGrid,
    launcher: &L,
) -> Result<RgbImage, LaunchError> {
    dither_tiles(image, matrix, strength, grid, launcher).map(|(out, _)| out)
}

/// Ordered dither stage with an explicit table and launcher.
///
/// A zero `strength` returns an unmodified copy. A launch failure is
/// logged and also returns an unmodified copy.
#[must_use]
pub fn ordered_dither_with<L: WorkerLauncher>(
    image: &RgbImage,
    matrix: &DitherMatrix,
    strength: u32,
    grid: DitherGrid,
    launcher: &L,
) -> (RgbImage, DitherOutcome) {
    if strength == 0 {
        return (image.clone(), DitherOutcome::Disabled);
    }
    match dither_tiles(image, matrix, strength, grid, launcher) {
        Ok((out, workers)) => (out, DitherOutcome::Applied { workers }),
        Err(err) => {
            tracing::warn!(error = %err, "skipping ordered dither, keeping undithered image");
            (image.clone(), DitherOutcome::LaunchFailed)
        }
    }
}

/// Ordered dither stage with the Bayer table on OS threads.
///
/// This is step 4 in the pipeline, between edge hinting and palette
/// quantization.
#[must_use]
pub fn ordered_dither(
    image: &RgbImage,
    strength: u32,
    grid: DitherGrid,
) -> (RgbImage, DitherOutcome) {
    ordered_dither_with(image, &DitherMatrix::BAYER_8X8, strength, grid, &ThreadLauncher)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                ((x * 7 + y) % 256) as u8,
                ((y * 5) % 256) as u8,
                ((x * y) % 256) as u8,
            ])
        })
    }

    /// Counts launches and refuses the worker at `fail_at`.
    struct FlakyLauncher {
        fail_at: Option<usize>,
        launched: Cell<usize>,
    }

    impl FlakyLauncher {
        const fn new(fail_at: Option<usize>) -> Self {
            Self {
                fail_at,
                launched: Cell::new(0),
            }
        }
    }

    impl WorkerLauncher for FlakyLauncher {
        fn launch<'scope, 'env, F>(
            &self,
            scope: &'scope Scope<'scope, 'env>,
            index: usize,
            work: F,
        ) -> io::Result<ScopedJoinHandle<'scope, ()>>
        where
            F: FnOnce() + Send + 'scope,
        {
            if self.fail_at == Some(index) {
                return Err(io::Error::other("thread limit reached"));
            }
            self.launched.set(self.launched.get() + 1);
            ThreadLauncher.launch(scope, index, work)
        }
    }

    #[test]
    fn bayer_table_is_a_permutation() {
        let mut seen = [false; 64];
        for y in 0..8 {
            for x in 0..8 {
                let t = DitherMatrix::BAYER_8X8.threshold(x, y);
                assert!(!seen[t as usize], "duplicate threshold {t}");
                seen[t as usize] = true;
            }
        }
    }

    #[test]
    fn custom_table_rejects_out_of_range() {
        let mut table = [[0u8; 8]; 8];
        assert!(DitherMatrix::new(table).is_some());
        table[3][4] = 64;
        assert!(DitherMatrix::new(table).is_none());
    }

    #[test]
    fn threshold_tiles_every_eight_pixels() {
        let m = DitherMatrix::BAYER_8X8;
        assert_eq!(m.threshold(0, 0), m.threshold(8, 16));
        assert_eq!(m.threshold(3, 5), m.threshold(11, 13));
        assert_eq!(m.threshold(7, 0), 63);
    }

    #[test]
    fn offsets_span_half_strength_each_way() {
        let offsets = DitherMatrix::BAYER_8X8.offsets(18);
        // t = 0 -> -0.5 * 18
        assert_eq!(offsets.at(0, 0), -9);
        // t = 63 -> +0.5 * 18
        assert_eq!(offsets.at(7, 0), 9);
        // t = 31 and t = 32 sit just either side of zero.
        assert_eq!(offsets.at(7, 1), 0);
        assert_eq!(offsets.at(0, 1), 0);
    }

    #[test]
    fn offset_rounds_half_away_from_zero() {
        // (48 - 31.5) / 63 * 6 = 1.571 -> 2
        assert_eq!(threshold_offset(48, 6), 2);
        // (0 - 31.5) / 63 * 3 = -1.5 -> -2
        assert_eq!(threshold_offset(0, 3), -2);
    }

    #[test]
    fn each_pixel_gets_its_own_offset() {
        let img = RgbImage::from_pixel(16, 16, image::Rgb([100, 5, 250]));
        let (out, outcome) = ordered_dither(&img, 18, DitherGrid::QUADRANTS);
        assert_eq!(outcome, DitherOutcome::Applied { workers: 4 });
        let offsets = DitherMatrix::BAYER_8X8.offsets(18);
        for (x, y, p) in out.enumerate_pixels() {
            let o = offsets.at(x, y);
            let expect = |v: u8| (i16::from(v) + o).clamp(0, 255) as u8;
            assert_eq!(p.0, [expect(100), expect(5), expect(250)], "at ({x},{y})");
        }
    }

    #[test]
    fn zero_strength_is_identity() {
        let img = gradient(31, 17);
        let (out, outcome) = ordered_dither(&img, 0, DitherGrid::QUADRANTS);
        assert_eq!(out, img);
        assert_eq!(outcome, DitherOutcome::Disabled);
    }

    #[test]
    fn parallel_matches_reference_for_any_grid() {
        let grids = [
            DitherGrid { columns: 1, rows: 1 },
            DitherGrid::QUADRANTS,
            DitherGrid { columns: 3, rows: 2 },
            DitherGrid { columns: 1, rows: 5 },
            DitherGrid { columns: 8, rows: 1 },
            DitherGrid { columns: 64, rows: 64 },
        ];
        for (w, h) in [(37, 23), (240, 135), (1, 1), (2, 9)] {
            let img = gradient(w, h);
            let reference = ordered_dither_reference(&img, &DitherMatrix::BAYER_8X8, 18);
            for grid in grids {
                let parallel = try_dither_parallel(
                    &img,
                    &DitherMatrix::BAYER_8X8,
                    18,
                    grid,
                    &ThreadLauncher,
                )
                .unwrap();
                assert_eq!(parallel, reference, "{w}x{h} with grid {grid}");
            }
        }
    }

    #[test]
    fn quadrants_split_at_floor_midpoints() {
        let regions = partition(
            Dimensions {
                width: 5,
                height: 3,
            },
            DitherGrid::QUADRANTS,
        );
        assert_eq!(
            regions,
            vec![
                Region { x0: 0, x1: 2, y0: 0, y1: 1 },
                Region { x0: 2, x1: 5, y0: 0, y1: 1 },
                Region { x0: 0, x1: 2, y0: 1, y1: 3 },
                Region { x0: 2, x1: 5, y0: 1, y1: 3 },
            ]
        );
    }

    #[test]
    fn partition_is_disjoint_and_covering() {
        let dims = Dimensions {
            width: 41,
            height: 19,
        };
        for grid in [DitherGrid::QUADRANTS, DitherGrid { columns: 5, rows: 3 }] {
            let regions = partition(dims, grid);
            assert_eq!(regions.len(), grid.tiles() as usize);
            let total: u64 = regions.iter().map(Region::area).sum();
            assert_eq!(total, 41 * 19);
            for y in 0..dims.height {
                for x in 0..dims.width {
                    let owners = regions.iter().filter(|r| r.contains(x, y)).count();
                    assert_eq!(owners, 1, "pixel ({x},{y}) owned {owners} times");
                }
            }
        }
    }

    #[test]
    fn four_workers_launched_for_quadrants() {
        let launcher = FlakyLauncher::new(None);
        let img = gradient(20, 20);
        let (_, outcome) = ordered_dither_with(
            &img,
            &DitherMatrix::BAYER_8X8,
            18,
            DitherGrid::QUADRANTS,
            &launcher,
        );
        assert_eq!(outcome, DitherOutcome::Applied { workers: 4 });
        assert_eq!(launcher.launched.get(), 4);
    }

    #[test]
    fn empty_tiles_get_no_worker() {
        let launcher = FlakyLauncher::new(None);
        let img = gradient(3, 2);
        let grid = DitherGrid {
            columns: 8,
            rows: 8,
        };
        let (out, outcome) = ordered_dither_with(&img, &DitherMatrix::BAYER_8X8, 18, grid, &launcher);
        assert_eq!(outcome, DitherOutcome::Applied { workers: 6 });
        assert_eq!(launcher.launched.get(), 6);
        assert_eq!(
            out,
            ordered_dither_reference(&img, &DitherMatrix::BAYER_8X8, 18)
        );
    }

    #[test]
    fn launch_failure_reports_worker() {
        let launcher = FlakyLauncher::new(Some(2));
        let img = gradient(20, 20);
        let err = try_dither_parallel(
            &img,
            &DitherMatrix::BAYER_8X8,
            18,
            DitherGrid::QUADRANTS,
            &launcher,
        )
        .unwrap_err();
        assert_eq!(err.worker, 2);
        assert_eq!(launcher.launched.get(), 2);
    }

    #[test]
    fn launch_failure_keeps_undithered_image() {
        let launcher = FlakyLauncher::new(Some(0));
        let img = gradient(20, 20);
        let (out, outcome) = ordered_dither_with(
            &img,
            &DitherMatrix::BAYER_8X8,
            18,
            DitherGrid::QUADRANTS,
            &launcher,
        );
        assert_eq!(outcome, DitherOutcome::LaunchFailed);
        assert_eq!(out, img);
    }
}
