//! retroframe-io: Filesystem sources and sinks for the retro filter.
//!
//! Loads and saves still images and streams animated GIFs frame by frame
//! through the [`FrameSource`](retroframe_pipeline::FrameSource) and
//! [`FrameSink`](retroframe_pipeline::FrameSink) traits.

pub mod gif;
pub mod still;

pub use gif::{GifFrameSink, GifFrameSource, SinkError, SourceError};
pub use still::{LoadError, SaveError, load_image, save_image};
