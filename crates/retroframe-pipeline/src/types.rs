//! Shared types for the retroframe filter pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can pass frames around
/// without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage` for the edge mask intermediate.
pub use image::GrayImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Worker grid used to split ordered dithering across threads.
///
/// Column boundaries sit at `k * width / columns` and row boundaries at
/// `k * height / rows` (integer division), so the default 2x2 grid splits
/// at the exact `width / 2` and `height / 2` midpoints and odd dimensions
/// produce unequal quadrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DitherGrid {
    /// Number of tile columns.
    pub columns: u32,
    /// Number of tile rows.
    pub rows: u32,
}

impl DitherGrid {
    /// The classic four-quadrant split.
    pub const QUADRANTS: Self = Self {
        columns: 2,
        rows: 2,
    };

    /// Upper bound on `columns * rows`.
    pub const MAX_TILES: u32 = 4096;

    /// Number of tiles in the grid, saturating at `u32::MAX`.
    #[must_use]
    pub const fn tiles(self) -> u32 {
        self.columns.saturating_mul(self.rows)
    }

    /// Check that both axes are non-zero and the tile count is at most
    /// [`MAX_TILES`](Self::MAX_TILES).
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending grid.
    pub fn check(self) -> Result<(), String> {
        if self.columns == 0 || self.rows == 0 {
            return Err(format!(
                "grid must have at least one column and row, got {self}"
            ));
        }
        if self.tiles() > Self::MAX_TILES {
            return Err(format!(
                "grid {self} has more than {} tiles",
                Self::MAX_TILES
            ));
        }
        Ok(())
    }
}

impl Default for DitherGrid {
    fn default() -> Self {
        Self::QUADRANTS
    }
}

impl fmt::Display for DitherGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

impl FromStr for DitherGrid {
    type Err = String;

    /// Parse `"COLSxROWS"`, e.g. `"2x2"` or `"4x1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cols, rows) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("grid must be 'COLSxROWS', got: '{s}'"))?;
        let columns: u32 = cols
            .trim()
            .parse()
            .map_err(|e| format!("invalid grid columns '{cols}': {e}"))?;
        let rows: u32 = rows
            .trim()
            .parse()
            .map_err(|e| format!("invalid grid rows '{rows}': {e}"))?;
        let grid = Self { columns, rows };
        grid.check()?;
        Ok(grid)
    }
}

/// Configuration for the retro filter.
///
/// The first four fields are the user-facing knobs; `dither_grid` and
/// `seed` control how the work is executed and whether palette
/// clustering is reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Width of the low-resolution working image. Height follows the
    /// source aspect ratio.
    pub target_width: u32,

    /// Number of palette colors (K) for quantization. Must be at least 2.
    pub palette_colors: u32,

    /// Peak-to-peak amplitude of the ordered dither offset. Zero disables
    /// dithering.
    pub dither_strength: u32,

    /// Whether to darken detected edges on the working image.
    pub edge_hint: bool,

    /// Tile grid for the parallel dither stage.
    pub dither_grid: DitherGrid,

    /// Seed for palette clustering. `None` seeds from OS entropy, so
    /// repeated runs may pick slightly different palettes.
    pub seed: Option<u64>,
}

impl FilterConfig {
    /// Default working width (GBA screen width).
    pub const DEFAULT_TARGET_WIDTH: u32 = 240;
    /// Default palette size.
    pub const DEFAULT_PALETTE_COLORS: u32 = 16;
    /// Default dither amplitude.
    pub const DEFAULT_DITHER_STRENGTH: u32 = 18;
    /// Edge hinting is on by default.
    pub const DEFAULT_EDGE_HINT: bool = true;
    /// Default clustering seed.
    pub const DEFAULT_SEED: u64 = 0x6ba_2001;

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `target_width` is zero,
    /// `palette_colors` is below 2, or the dither grid has an empty axis
    /// or more than [`DitherGrid::MAX_TILES`] tiles.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.target_width == 0 {
            return Err(PipelineError::InvalidConfig(
                "target_width must be greater than 0".to_string(),
            ));
        }
        if self.palette_colors < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "palette_colors must be at least 2, got {}",
                self.palette_colors
            )));
        }
        self.dither_grid
            .check()
            .map_err(|e| PipelineError::InvalidConfig(format!("dither_grid: {e}")))
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            target_width: Self::DEFAULT_TARGET_WIDTH,
            palette_colors: Self::DEFAULT_PALETTE_COLORS,
            dither_strength: Self::DEFAULT_DITHER_STRENGTH,
            edge_hint: Self::DEFAULT_EDGE_HINT,
            dither_grid: DitherGrid::default(),
            seed: Some(Self::DEFAULT_SEED),
        }
    }
}

/// Build an [`RgbImage`] from a raw interleaved RGB buffer.
///
/// # Errors
///
/// Returns [`PipelineError::BufferSize`] if `data.len()` is not
/// `width * height * 3`.
pub fn rgb_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<RgbImage, PipelineError> {
    let actual = data.len();
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or(PipelineError::BufferSize {
            expected: usize::MAX,
            actual,
        })?;
    if actual != expected {
        return Err(PipelineError::BufferSize { expected, actual });
    }
    RgbImage::from_raw(width, height, data).ok_or(PipelineError::BufferSize { expected, actual })
}

/// What the dither stage actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherOutcome {
    /// The pattern was applied by this many workers.
    Applied {
        /// Number of workers that ran.
        workers: u32,
    },
    /// Strength was zero, so the stage passed its input through.
    Disabled,
    /// A worker could not be started; the undithered image was kept.
    LaunchFailed,
}

/// Result of running the pipeline with every intermediate kept.
///
/// Each field holds the output of one stage so callers can inspect or
/// save the intermediate images.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 0: the source image.
    pub original: RgbImage,
    /// Stage 1: luma contrast adjusted.
    pub contrasted: RgbImage,
    /// Stage 2: area-averaged working image.
    pub downscaled: RgbImage,
    /// Stage 3: edge mask (`Some` only when edge hinting is enabled).
    pub edge_mask: Option<GrayImage>,
    /// Stage 3: working image after edge darkening (equal to `downscaled`
    /// when edge hinting is disabled).
    pub edge_hinted: RgbImage,
    /// Stage 4: dithered working image.
    pub dithered: RgbImage,
    /// How the dither stage ran.
    pub dither_outcome: DitherOutcome,
    /// Stage 5: palette-quantized working image.
    pub quantized: RgbImage,
    /// Palette chosen by the quantizer, one entry per cluster.
    pub palette: Vec<[u8; 3]>,
    /// Stage 6: nearest-neighbor upscale at source resolution.
    pub upscaled: RgbImage,
    /// Stage 7: final sharpened image.
    pub sharpened: RgbImage,
}

impl StagedResult {
    /// The final pipeline output.
    #[must_use]
    pub const fn output(&self) -> &RgbImage {
        &self.sharpened
    }

    /// Consume the result and keep only the final image.
    #[must_use]
    pub fn into_output(self) -> RgbImage {
        self.sharpened
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input image has a zero-sized axis.
    #[error("image must not be empty, got {width}x{height}")]
    EmptyImage {
        /// Input width.
        width: u32,
        /// Input height.
        height: u32,
    },

    /// A raw frame buffer does not hold exactly `width * height * 3` bytes.
    #[error("raw RGB buffer has {actual} bytes, expected {expected}")]
    BufferSize {
        /// Required byte count.
        expected: usize,
        /// Supplied byte count.
        actual: usize,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid filter configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn filter_config_defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.target_width, 240);
        assert_eq!(config.palette_colors, 16);
        assert_eq!(config.dither_strength, 18);
        assert!(config.edge_hint);
        assert_eq!(config.dither_grid, DitherGrid::QUADRANTS);
        assert_eq!(config.dither_grid.tiles(), 4);
        assert_eq!(config.seed, Some(FilterConfig::DEFAULT_SEED));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_target_width_is_rejected() {
        let config = FilterConfig {
            target_width: 0,
            ..FilterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn single_color_palette_is_rejected() {
        let config = FilterConfig {
            palette_colors: 1,
            ..FilterConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid filter configuration: palette_colors must be at least 2, got 1",
        );
    }

    #[test]
    fn empty_grid_axis_is_rejected() {
        let config = FilterConfig {
            dither_grid: DitherGrid {
                columns: 0,
                rows: 2,
            },
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let huge = DitherGrid {
            columns: 65_536,
            rows: 65_536,
        };
        assert_eq!(huge.tiles(), u32::MAX);
        let config = FilterConfig {
            dither_grid: huge,
            ..FilterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let at_limit = DitherGrid {
            columns: 64,
            rows: 64,
        };
        assert!(at_limit.check().is_ok());
        assert!(DitherGrid { columns: 65, rows: 64 }.check().is_err());
    }

    #[test]
    fn oversized_grid_fails_to_parse() {
        assert!("65536x65536".parse::<DitherGrid>().is_err());
        assert!("4097x1".parse::<DitherGrid>().is_err());
        assert_eq!(
            "4096x1".parse::<DitherGrid>().unwrap().tiles(),
            DitherGrid::MAX_TILES
        );
    }

    #[test]
    fn grid_parses_cols_by_rows() {
        assert_eq!(
            "3x1".parse::<DitherGrid>().unwrap(),
            DitherGrid {
                columns: 3,
                rows: 1
            }
        );
        assert_eq!("2X2".parse::<DitherGrid>().unwrap(), DitherGrid::QUADRANTS);
        assert!("0x2".parse::<DitherGrid>().is_err());
        assert!("four".parse::<DitherGrid>().is_err());
    }

    #[test]
    fn grid_display_round_trips_through_parse() {
        let grid = DitherGrid {
            columns: 4,
            rows: 3,
        };
        assert_eq!(grid.to_string().parse::<DitherGrid>().unwrap(), grid);
    }

    #[test]
    fn rgb_from_raw_checks_length() {
        assert!(rgb_from_raw(2, 2, vec![0; 12]).is_ok());
        assert!(matches!(
            rgb_from_raw(2, 2, vec![0; 11]),
            Err(PipelineError::BufferSize {
                expected: 12,
                actual: 11
            })
        ));
        let err = rgb_from_raw(2, 2, vec![0; 16]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferSize {
                expected: 12,
                actual: 16
            }
        ));
    }

    #[test]
    fn dimensions_of_image() {
        let img = RgbImage::new(7, 3);
        let dims = Dimensions::of(&img);
        assert_eq!(dims.to_string(), "7x3");
        assert!(!dims.is_empty());
        assert!(Dimensions::of(&RgbImage::new(0, 3)).is_empty());
    }

    #[test]
    fn filter_config_serde_round_trip() {
        let config = FilterConfig {
            target_width: 160,
            palette_colors: 8,
            dither_strength: 0,
            edge_hint: false,
            dither_grid: DitherGrid {
                columns: 3,
                rows: 2,
            },
            seed: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: FilterConfig = serde_json::from_str(r#"{"palette_colors": 4}"#).unwrap();
        assert_eq!(config.palette_colors, 4);
        assert_eq!(config.target_width, FilterConfig::DEFAULT_TARGET_WIDTH);
    }
}
