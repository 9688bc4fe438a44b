//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`] which runs the entire filter in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use retroframe_pipeline::{FilterConfig, Pipeline, PipelineError, RgbImage};
//! # fn run(image: RgbImage) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(image, FilterConfig::default())
//!     .adjust_contrast()?
//!     .downscale()
//!     .hint_edges()
//!     .dither()
//!     .quantize()?
//!     .upscale()
//!     .sharpen()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state (or
//! `Result` for fallible stages), carrying every previously computed
//! intermediate. Skipping a stage or calling them out of order does not
//! compile.
//!
//! Every state keeps the source image and the full-resolution contrast
//! image alive until [`Sharpened::into_result`]. Callers that only need
//! the final frame should use [`crate::process`].

use crate::dither::{DitherMatrix, ThreadLauncher, WorkerLauncher};
use crate::types::{
    Dimensions, DitherOutcome, FilterConfig, GrayImage, PipelineError, RgbImage, StagedResult,
};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`adjust_contrast`](Self::adjust_contrast) to validate the input
/// and advance.
#[must_use = "pipeline stages are consumed by advancing, call .adjust_contrast() to continue"]
pub struct Pending {
    config: FilterConfig,
    original: RgbImage,
}

impl Pending {
    /// The untouched source image.
    #[must_use]
    pub const fn original(&self) -> &RgbImage {
        &self.original
    }

    /// The configuration this run will use.
    #[must_use]
    pub const fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Validate config and input, then boost luma.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the config fails
    /// [`FilterConfig::validate`], or [`PipelineError::EmptyImage`] if the
    /// source has a zero-sized axis.
    pub fn adjust_contrast(self) -> Result<Contrasted, PipelineError> {
        self.config.validate()?;
        let source = Dimensions::of(&self.original);
        if source.is_empty() {
            return Err(PipelineError::EmptyImage {
                width: source.width,
                height: source.height,
            });
        }
        let contrasted = crate::contrast::adjust_contrast(&self.original);
        tracing::debug!(stage = "contrast", %source, "luma boosted");
        Ok(Contrasted {
            config: self.config,
            original: self.original,
            contrasted,
        })
    }
}

// ───────────────────────── Stage 1: Contrasted ───────────────────────

/// Pipeline state after the luma boost.
#[must_use = "pipeline stages are consumed by advancing, call .downscale() to continue"]
pub struct Contrasted {
    config: FilterConfig,
    original: RgbImage,
    contrasted: RgbImage,
}

impl Contrasted {
    /// The contrast-adjusted image at source resolution.
    #[must_use]
    pub const fn contrasted(&self) -> &RgbImage {
        &self.contrasted
    }

    /// Area-average down to `config.target_width`.
    pub fn downscale(self) -> Downscaled {
        let downscaled = crate::downsample::downscale(&self.contrasted, self.config.target_width);
        tracing::debug!(
            stage = "downscale",
            working = %Dimensions::of(&downscaled),
            "working image ready"
        );
        Downscaled {
            config: self.config,
            original: self.original,
            contrasted: self.contrasted,
            downscaled,
        }
    }
}

// ───────────────────────── Stage 2: Downscaled ───────────────────────

/// Pipeline state at working resolution.
#[must_use = "pipeline stages are consumed by advancing, call .hint_edges() to continue"]
pub struct Downscaled {
    config: FilterConfig,
    original: RgbImage,
    contrasted: RgbImage,
    downscaled: RgbImage,
}

impl Downscaled {
    /// The area-averaged working image.
    #[must_use]
    pub const fn downscaled(&self) -> &RgbImage {
        &self.downscaled
    }

    /// Darken detected outlines, or pass through when
    /// `config.edge_hint` is off.
    pub fn hint_edges(self) -> EdgesHinted {
        let (edge_hinted, edge_mask) = if self.config.edge_hint {
            let (hinted, mask) = crate::edge::hint_edges(&self.downscaled);
            tracing::debug!(
                stage = "edge_hint",
                edge_pixels = mask.pixels().filter(|p| p.0[0] > 0).count(),
                "edges darkened"
            );
            (hinted, Some(mask))
        } else {
            tracing::debug!(stage = "edge_hint", "disabled");
            (self.downscaled.clone(), None)
        };
        EdgesHinted {
            config: self.config,
            original: self.original,
            contrasted: self.contrasted,
            downscaled: self.downscaled,
            edge_mask,
            edge_hinted,
        }
    }
}

// ───────────────────────── Stage 3: EdgesHinted ──────────────────────

/// Pipeline state after optional edge darkening.
#[must_use = "pipeline stages are consumed by advancing, call .dither() to continue"]
pub struct EdgesHinted {
    config: FilterConfig,
    original: RgbImage,
    contrasted: RgbImage,
    downscaled: RgbImage,
    edge_mask: Option<GrayImage>,
    edge_hinted: RgbImage,
}

impl EdgesHinted {
    /// The dilated edge mask, or `None` if edge hinting was disabled.
    #[must_use]
    pub const fn edge_mask(&self) -> Option<&GrayImage> {
        self.edge_mask.as_ref()
    }

    /// The working image after edge darkening.
    #[must_use]
    pub const fn edge_hinted(&self) -> &RgbImage {
        &self.edge_hinted
    }

    /// Apply the Bayer pattern on OS threads.
    pub fn dither(self) -> Dithered {
        self.dither_with(&DitherMatrix::BAYER_8X8, &ThreadLauncher)
    }

    /// Apply `matrix` using `launcher` to start the workers.
    pub fn dither_with<L: WorkerLauncher>(self, matrix: &DitherMatrix, launcher: &L) -> Dithered {
        let (dithered, dither_outcome) = crate::dither::ordered_dither_with(
            &self.edge_hinted,
            matrix,
            self.config.dither_strength,
            self.config.dither_grid,
            launcher,
        );
        tracing::debug!(stage = "dither", outcome = ?dither_outcome, "ordered dither done");
        Dithered {
            config: self.config,
            original: self.original,
            contrasted: self.contrasted,
            downscaled: self.downscaled,
            edge_mask: self.edge_mask,
            edge_hinted: self.edge_hinted,
            dithered,
            dither_outcome,
        }
    }
}

// ───────────────────────── Stage 4: Dithered ─────────────────────────

/// Pipeline state after ordered dithering.
#[must_use = "pipeline stages are consumed by advancing, call .quantize() to continue"]
pub struct Dithered {
    config: FilterConfig,
    original: RgbImage,
    contrasted: RgbImage,
    downscaled: RgbImage,
    edge_mask: Option<GrayImage>,
    edge_hinted: RgbImage,
    dithered: RgbImage,
    dither_outcome: DitherOutcome,
}

impl Dithered {
    /// The dithered working image.
    #[must_use]
    pub const fn dithered(&self) -> &RgbImage {
        &self.dithered
    }

    /// How the dither stage ran.
    #[must_use]
    pub const fn dither_outcome(&self) -> DitherOutcome {
        self.dither_outcome
    }

    /// Reduce to `config.palette_colors` colors.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the palette size is
    /// below 2.
    pub fn quantize(self) -> Result<Quantized, PipelineError> {
        let crate::quantize::Quantized {
            image: quantized,
            palette,
        } = crate::quantize::quantize(
            &self.dithered,
            self.config.palette_colors,
            self.config.seed,
        )?;
        tracing::debug!(stage = "quantize", colors = palette.len(), "palette chosen");
        Ok(Quantized {
            config: self.config,
            original: self.original,
            contrasted: self.contrasted,
            downscaled: self.downscaled,
            edge_mask: self.edge_mask,
            edge_hinted: self.edge_hinted,
            dithered: self.dithered,
            dither_outcome: self.dither_outcome,
            quantized,
            palette,
        })
    }
}

// ───────────────────────── Stage 5: Quantized ────────────────────────

/// Pipeline state after palette reduction.
#[must_use = "pipeline stages are consumed by advancing, call .upscale() to continue"]
pub struct Quantized {
    config: FilterConfig,
    original: RgbImage,
    contrasted: RgbImage,
    downscaled: RgbImage,
    edge_mask: Option<GrayImage>,
    edge_hinted: RgbImage,
    dithered: RgbImage,
    dither_outcome: DitherOutcome,
    quantized: RgbImage,
    palette: Vec<[u8; 3]>,
}

impl Quantized {
    /// The palette-quantized working image.
    #[must_use]
    pub const fn quantized(&self) -> &RgbImage {
        &self.quantized
    }

    /// Palette entries, one per cluster.
    #[must_use]
    pub fn palette(&self) -> &[[u8; 3]] {
        &self.palette
    }

    /// Nearest-neighbour upscale back to the source geometry.
    pub fn upscale(self) -> Upscaled {
        let upscaled =
            crate::upscale::upscale(&self.quantized, Dimensions::of(&self.original));
        tracing::debug!(stage = "upscale", "restored source geometry");
        Upscaled {
            original: self.original,
            contrasted: self.contrasted,
            downscaled: self.downscaled,
            edge_mask: self.edge_mask,
            edge_hinted: self.edge_hinted,
            dithered: self.dithered,
            dither_outcome: self.dither_outcome,
            quantized: self.quantized,
            palette: self.palette,
            upscaled,
        }
    }
}

// ───────────────────────── Stage 6: Upscaled ─────────────────────────

/// Pipeline state back at source resolution.
#[must_use = "pipeline stages are consumed by advancing, call .sharpen() to continue"]
pub struct Upscaled {
    original: RgbImage,
    contrasted: RgbImage,
    downscaled: RgbImage,
    edge_mask: Option<GrayImage>,
    edge_hinted: RgbImage,
    dithered: RgbImage,
    dither_outcome: DitherOutcome,
    quantized: RgbImage,
    palette: Vec<[u8; 3]>,
    upscaled: RgbImage,
}

impl Upscaled {
    /// The blocky full-resolution image.
    #[must_use]
    pub const fn upscaled(&self) -> &RgbImage {
        &self.upscaled
    }

    /// Final unsharp mask.
    pub fn sharpen(self) -> Sharpened {
        let sharpened = crate::sharpen::sharpen(&self.upscaled);
        tracing::debug!(stage = "sharpen", "frame complete");
        Sharpened {
            result: StagedResult {
                original: self.original,
                contrasted: self.contrasted,
                downscaled: self.downscaled,
                edge_mask: self.edge_mask,
                edge_hinted: self.edge_hinted,
                dithered: self.dithered,
                dither_outcome: self.dither_outcome,
                quantized: self.quantized,
                palette: self.palette,
                upscaled: self.upscaled,
                sharpened,
            },
        }
    }
}

// ───────────────────────── Stage 7: Sharpened ────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to take the staged output"]
pub struct Sharpened {
    result: StagedResult,
}

impl Sharpened {
    /// The finished image.
    #[must_use]
    pub const fn sharpened(&self) -> &RgbImage {
        self.result.output()
    }

    /// Consume the pipeline and return every intermediate.
    pub fn into_result(self) -> StagedResult {
        self.result
    }
}

/// Entry point for the incremental pipeline.
///
/// Each stage method consumes the current state and returns the next,
/// making it a compile-time error to skip stages or call them out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Store the source image and config. No processing happens until
    /// [`.adjust_contrast()`](Pending::adjust_contrast).
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: RgbImage, config: FilterConfig) -> Pending {
        Pending {
            config,
            original: image,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::thread::{Scope, ScopedJoinHandle};

    use super::*;

    /// 64x48 image with a dark left half and a bright right half.
    fn split_image() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, _| {
            if x < 32 {
                image::Rgb([30, 60, 90])
            } else {
                image::Rgb([220, 200, 180])
            }
        })
    }

    fn small_config() -> FilterConfig {
        FilterConfig {
            target_width: 32,
            palette_colors: 4,
            ..FilterConfig::default()
        }
    }

    struct RefusingLauncher;

    impl WorkerLauncher for RefusingLauncher {
        fn launch<'scope, 'env, F>(
            &self,
            _scope: &'scope Scope<'scope, 'env>,
            _index: usize,
            _work: F,
        ) -> io::Result<ScopedJoinHandle<'scope, ()>>
        where
            F: FnOnce() + Send + 'scope,
        {
            Err(io::Error::other("no threads available"))
        }
    }

    #[test]
    fn pending_exposes_source() {
        let pending = Pipeline::new(split_image(), small_config());
        assert_eq!(pending.original().dimensions(), (64, 48));
        assert_eq!(pending.config().target_width, 32);
    }

    #[test]
    fn empty_image_is_rejected() {
        let result = Pipeline::new(RgbImage::new(0, 10), small_config()).adjust_contrast();
        assert!(matches!(
            result,
            Err(PipelineError::EmptyImage {
                width: 0,
                height: 10
            })
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let config = FilterConfig {
            palette_colors: 1,
            ..small_config()
        };
        let result = Pipeline::new(split_image(), config).adjust_contrast();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn intermediates_have_expected_geometry() {
        let contrasted = Pipeline::new(split_image(), small_config())
            .adjust_contrast()
            .unwrap();
        assert_eq!(contrasted.contrasted().dimensions(), (64, 48));

        let downscaled = contrasted.downscale();
        assert_eq!(downscaled.downscaled().dimensions(), (32, 24));

        let hinted = downscaled.hint_edges();
        assert_eq!(hinted.edge_hinted().dimensions(), (32, 24));
        assert!(hinted.edge_mask().is_some());

        let dithered = hinted.dither();
        assert_eq!(
            dithered.dither_outcome(),
            DitherOutcome::Applied { workers: 4 }
        );

        let quantized = dithered.quantize().unwrap();
        assert_eq!(quantized.palette().len(), 4);
        assert_eq!(quantized.quantized().dimensions(), (32, 24));

        let upscaled = quantized.upscale();
        assert_eq!(upscaled.upscaled().dimensions(), (64, 48));

        let sharpened = upscaled.sharpen();
        assert_eq!(sharpened.sharpened().dimensions(), (64, 48));
    }

    #[test]
    fn disabled_edge_hint_passes_through() {
        let config = FilterConfig {
            edge_hint: false,
            ..small_config()
        };
        let hinted = Pipeline::new(split_image(), config)
            .adjust_contrast()
            .unwrap()
            .downscale()
            .hint_edges();
        assert!(hinted.edge_mask().is_none());
        let staged = hinted.dither().quantize().unwrap().upscale().sharpen().into_result();
        assert_eq!(staged.edge_hinted, staged.downscaled);
    }

    #[test]
    fn zero_strength_skips_dither() {
        let config = FilterConfig {
            dither_strength: 0,
            ..small_config()
        };
        let dithered = Pipeline::new(split_image(), config)
            .adjust_contrast()
            .unwrap()
            .downscale()
            .hint_edges()
            .dither();
        assert_eq!(dithered.dither_outcome(), DitherOutcome::Disabled);
        let staged = dithered.quantize().unwrap().upscale().sharpen().into_result();
        assert_eq!(staged.dithered, staged.edge_hinted);
    }

    #[test]
    fn launch_failure_keeps_going() {
        let staged = Pipeline::new(split_image(), small_config())
            .adjust_contrast()
            .unwrap()
            .downscale()
            .hint_edges()
            .dither_with(&DitherMatrix::BAYER_8X8, &RefusingLauncher)
            .quantize()
            .unwrap()
            .upscale()
            .sharpen()
            .into_result();
        assert_eq!(staged.dither_outcome, DitherOutcome::LaunchFailed);
        assert_eq!(staged.dithered, staged.edge_hinted);
        assert_eq!(staged.output().dimensions(), (64, 48));
    }

    #[test]
    fn staged_result_matches_one_shot_process() {
        let staged = Pipeline::new(split_image(), small_config())
            .adjust_contrast()
            .unwrap()
            .downscale()
            .hint_edges()
            .dither()
            .quantize()
            .unwrap()
            .upscale()
            .sharpen()
            .into_result();
        let direct = crate::process(&split_image(), &small_config()).unwrap();
        assert_eq!(staged.into_output(), direct);
    }
}
