//! Apply the filter to every frame of a stream, in order.
//!
//! [`FrameSequencer`] pulls frames from a [`FrameSource`], runs
//! [`crate::process`] on each with one fixed [`FilterConfig`], and pushes
//! the results into a [`FrameSink`]. There is never more than one frame in
//! flight and frames leave in the order they arrived.
//!
//! The sink is opened before the first pull when the source already knows
//! its geometry and frame rate. Otherwise it is opened lazily from the
//! first frame, falling back to [`DEFAULT_FRAME_RATE`] when the source
//! rate is unknown.

use std::ops::ControlFlow;

use crate::types::{Dimensions, FilterConfig, PipelineError, RgbImage};

/// Frame rate used when the source does not report a usable one.
pub const DEFAULT_FRAME_RATE: f64 = 15.0;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Geometry and timing a sink is opened with.
///
/// The frame rate is always finite and positive; [`StreamFormat::new`] is
/// the only way to build one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    dimensions: Dimensions,
    frame_rate: f64,
}

impl StreamFormat {
    /// Build a format, replacing an unusable rate (zero, negative, NaN or
    /// infinite) with [`DEFAULT_FRAME_RATE`].
    #[must_use]
    pub fn new(dimensions: Dimensions, reported_rate: f64) -> Self {
        let frame_rate = if is_usable_rate(reported_rate) {
            reported_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        Self {
            dimensions,
            frame_rate,
        }
    }

    /// Frame size in pixels.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Frames per second.
    #[must_use]
    pub const fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

fn is_usable_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

/// A stream of decoded frames.
pub trait FrameSource {
    /// Error produced while reading.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reported frames per second. Values `<= 0` or non-finite mean
    /// unknown.
    fn frame_rate(&self) -> f64;

    /// Frame size, if known before the first frame is read.
    fn dimensions(&self) -> Option<Dimensions>;

    /// Next frame, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns the source's error if a frame cannot be read or decoded.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

/// A consumer of filtered frames.
pub trait FrameSink {
    /// Error produced while writing.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prepare for frames of `format`. Called at most once, before any
    /// [`write_frame`](Self::write_frame).
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the output cannot be created.
    fn open(&mut self, format: StreamFormat) -> Result<(), Self::Error>;

    /// Append one frame.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the frame cannot be written.
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), Self::Error>;

    /// Flush and close. Called once if the sink was opened.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if buffered output cannot be flushed.
    fn finish(&mut self) -> Result<(), Self::Error>;
}

/// Errors that abort a sequence run.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// The source failed while reading frame `frame_index`.
    #[error("failed to read frame {frame_index}")]
    Source {
        /// Zero-based index of the frame being read.
        frame_index: usize,
        /// Underlying source error.
        #[source]
        source: BoxError,
    },

    /// The sink could not be opened.
    #[error("failed to open output stream")]
    SinkOpen(#[source] BoxError),

    /// The sink failed while writing frame `frame_index`, or while
    /// finishing (then `frame_index` is the number of frames written).
    #[error("failed to write frame {frame_index}")]
    Sink {
        /// Zero-based index of the frame being written.
        frame_index: usize,
        /// Underlying sink error.
        #[source]
        source: BoxError,
    },

    /// The filter rejected frame `frame_index`.
    #[error("failed to filter frame {frame_index}")]
    Pipeline {
        /// Zero-based index of the rejected frame.
        frame_index: usize,
        /// Underlying pipeline error.
        #[source]
        source: PipelineError,
    },
}

/// What a completed run did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceSummary {
    /// Frames written to the sink.
    pub frames: usize,
    /// Format the sink was opened with, `None` if it never was.
    pub format: Option<StreamFormat>,
    /// Whether the observer stopped the run before the source ran dry.
    pub stopped_early: bool,
}

/// Runs one filter configuration over a whole frame stream.
#[derive(Debug, Clone)]
pub struct FrameSequencer {
    config: FilterConfig,
}

impl FrameSequencer {
    /// Create a sequencer for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the config fails
    /// [`FilterConfig::validate`].
    pub fn new(config: FilterConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration applied to every frame.
    #[must_use]
    pub const fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter every frame of `source` into `sink`.
    ///
    /// # Errors
    ///
    /// See [`run_with`](Self::run_with).
    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<SequenceSummary, SequenceError>
    where
        S: FrameSource,
        K: FrameSink,
    {
        self.run_with(source, sink, |_, _| ControlFlow::Continue(()))
    }

    /// Filter every frame of `source` into `sink`, calling `observer` with
    /// each frame's index and filtered image after it has been written.
    /// Returning [`ControlFlow::Break`] stops the run; the sink is still
    /// finished.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::SinkOpen`] if the sink cannot be opened,
    /// and the other [`SequenceError`] variants if reading, filtering or
    /// writing any frame fails. A failing frame ends the run; the sink is
    /// not finished in that case.
    pub fn run_with<S, K, O>(
        &self,
        source: &mut S,
        sink: &mut K,
        mut observer: O,
    ) -> Result<SequenceSummary, SequenceError>
    where
        S: FrameSource,
        K: FrameSink,
        O: FnMut(usize, &RgbImage) -> ControlFlow<()>,
    {
        let mut format = None;
        if let Some(dimensions) = source.dimensions().filter(|d| !d.is_empty()) {
            let rate = source.frame_rate();
            if is_usable_rate(rate) {
                format = Some(open_sink(sink, StreamFormat::new(dimensions, rate))?);
            }
        }

        let mut frames = 0;
        let mut stopped_early = false;
        loop {
            let frame = source
                .next_frame()
                .map_err(|err| SequenceError::Source {
                    frame_index: frames,
                    source: Box::new(err),
                })?;
            let Some(frame) = frame else {
                break;
            };

            let filtered =
                crate::process(&frame, &self.config).map_err(|source| SequenceError::Pipeline {
                    frame_index: frames,
                    source,
                })?;

            if format.is_none() {
                let lazy = StreamFormat::new(Dimensions::of(&frame), source.frame_rate());
                format = Some(open_sink(sink, lazy)?);
            }
            sink.write_frame(&filtered)
                .map_err(|err| SequenceError::Sink {
                    frame_index: frames,
                    source: Box::new(err),
                })?;
            tracing::debug!(frame = frames, "frame written");

            let index = frames;
            frames += 1;
            if observer(index, &filtered).is_break() {
                stopped_early = true;
                break;
            }
        }

        if format.is_some() {
            sink.finish().map_err(|err| SequenceError::Sink {
                frame_index: frames,
                source: Box::new(err),
            })?;
        }
        tracing::info!(frames, stopped_early, "sequence finished");

        Ok(SequenceSummary {
            frames,
            format,
            stopped_early,
        })
    }
}

fn open_sink<K: FrameSink>(sink: &mut K, format: StreamFormat) -> Result<StreamFormat, SequenceError> {
    sink.open(format)
        .map_err(|err| SequenceError::SinkOpen(Box::new(err)))?;
    tracing::info!(
        dimensions = %format.dimensions(),
        frame_rate = format.frame_rate(),
        "output stream opened"
    );
    Ok(format)
}
