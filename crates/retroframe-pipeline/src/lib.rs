//! retroframe-pipeline: Pure retro-handheld image filter (sans-IO).
//!
//! Turns a photo or video frame into a low-resolution, dithered,
//! limited-palette image blown back up to its original size:
//! contrast -> downscale -> edge hint -> ordered dither -> palette
//! quantization -> nearest upscale -> sharpen.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! `RgbImage` buffers. File decoding, GIF streams and the command line
//! live in `retroframe-io` and `retroframe`.

pub mod contrast;
pub mod dither;
pub mod downsample;
pub mod edge;
pub mod pipeline;
pub mod quantize;
pub mod sequence;
pub mod sharpen;
pub mod types;
pub mod upscale;

pub use dither::{DitherMatrix, ThreadLauncher, WorkerLauncher};
pub use pipeline::Pipeline;
pub use sequence::{
    FrameSequencer, FrameSink, FrameSource, SequenceError, SequenceSummary, StreamFormat,
};
pub use types::{
    Dimensions, DitherGrid, DitherOutcome, FilterConfig, GrayImage, PipelineError, RgbImage,
    StagedResult, rgb_from_raw,
};

/// Run the full filter and return only the final image.
///
/// # Pipeline steps
///
/// 1. Luma contrast boost (YCrCb)
/// 2. Area-averaged downscale to `config.target_width`
/// 3. Optional edge darkening
/// 4. Parallel ordered dither
/// 5. k-means palette quantization
/// 6. Nearest-neighbour upscale to the source size
/// 7. Unsharp mask
///
/// The output always has the same dimensions as `image`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails validation
/// and [`PipelineError::EmptyImage`] if `image` has a zero-sized axis.
pub fn process(image: &RgbImage, config: &FilterConfig) -> Result<RgbImage, PipelineError> {
    config.validate()?;
    let source = Dimensions::of(image);
    if source.is_empty() {
        return Err(PipelineError::EmptyImage {
            width: source.width,
            height: source.height,
        });
    }

    // 1. Contrast.
    let contrasted = contrast::adjust_contrast(image);

    // 2. Working resolution.
    let working = downsample::downscale(&contrasted, config.target_width);

    // 3. Edge hint.
    let working = if config.edge_hint {
        edge::hint_edges(&working).0
    } else {
        working
    };

    // 4. Dither.
    let (working, _) = dither::ordered_dither(&working, config.dither_strength, config.dither_grid);

    // 5. Palette.
    let quantized = quantize::quantize(&working, config.palette_colors, config.seed)?;

    // 6-7. Back to source size, then sharpen.
    let upscaled = upscale::upscale(&quantized.image, source);
    Ok(sharpen::sharpen(&upscaled))
}

/// Run the full filter, keeping every intermediate image.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_staged(
    image: &RgbImage,
    config: &FilterConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(image.clone(), config.clone())
        .adjust_contrast()?
        .downscale()
        .hint_edges()
        .dither()
        .quantize()?
        .upscale()
        .sharpen()
        .into_result())
}
