//! Animated GIF frame source and sink.
//!
//! [`GifFrameSource`] decodes frames lazily, one per
//! [`FrameSource::next_frame`] call, already composited onto the full
//! canvas by the decoder. The reported frame rate comes from the first
//! frame's delay; a zero delay means the rate is unknown.
//!
//! [`GifFrameSink`] creates its file only when the sequencer opens it and
//! writes every frame with the same delay, looping forever. Frames are
//! encoded with the `gif` crate so the trailer write and final flush can
//! report errors.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use image::buffer::ConvertBuffer;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Delay, Frame, Frames, ImageDecoder, RgbaImage};
use retroframe_pipeline::{Dimensions, FrameSink, FrameSource, RgbImage, StreamFormat};

/// Errors that can occur while reading an animated GIF.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The file could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// File that was being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stream is not a GIF or a frame is corrupt.
    #[error("GIF decoding failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Errors that can occur while writing an animated GIF.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The output file could not be created.
    #[error("failed to create {}: {source}", path.display())]
    Open {
        /// File that was being created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stream is larger than a GIF canvas allows.
    #[error("{0} exceeds the 65535x65535 GIF canvas")]
    TooLarge(Dimensions),

    /// A frame does not match the size the sink was opened with.
    #[error("frame is {actual}, stream is {expected}")]
    FrameSize {
        /// Size given to [`FrameSink::open`].
        expected: Dimensions,
        /// Size of the offending frame.
        actual: Dimensions,
    },

    /// Encoding or writing a frame failed.
    #[error("GIF encoding failed: {0}")]
    Encode(#[from] gif::EncodingError),

    /// The trailer or buffered data could not be written out.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A frame was written before [`FrameSink::open`].
    #[error("GIF sink written before it was opened")]
    NotOpen,

    /// [`FrameSink::open`] was called twice.
    #[error("GIF sink is already open")]
    AlreadyOpen,
}

/// Frames per second implied by a GIF frame delay, `0.0` for a zero delay.
fn rate_from_delay(delay: Delay) -> f64 {
    let (numer, denom) = delay.numer_denom_ms();
    if numer == 0 {
        return 0.0;
    }
    1000.0 * f64::from(denom) / f64::from(numer)
}

/// Reads an animated GIF frame by frame.
pub struct GifFrameSource {
    frames: Frames<'static>,
    first: Option<Frame>,
    dimensions: Dimensions,
    frame_rate: f64,
}

impl GifFrameSource {
    /// Open the GIF at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] if the file cannot be opened and
    /// [`SourceError::Decode`] if it is not a readable GIF.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Decode a GIF from any seekable reader.
    ///
    /// The first frame is decoded immediately to learn the frame rate.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] if the header or first frame is
    /// invalid.
    pub fn from_reader<R: BufRead + Seek + 'static>(reader: R) -> Result<Self, SourceError> {
        let decoder = GifDecoder::new(reader)?;
        let (width, height) = decoder.dimensions();
        let mut frames = decoder.into_frames();
        let first = frames.next().transpose()?;
        let frame_rate = first.as_ref().map_or(0.0, |f| rate_from_delay(f.delay()));
        let dimensions = Dimensions { width, height };
        tracing::debug!(%dimensions, frame_rate, "GIF source opened");
        Ok(Self {
            frames,
            first,
            dimensions,
            frame_rate,
        })
    }
}

impl FrameSource for GifFrameSource {
    type Error = SourceError;

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn dimensions(&self) -> Option<Dimensions> {
        Some(self.dimensions)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let frame = match self.first.take() {
            Some(frame) => frame,
            None => match self.frames.next() {
                Some(frame) => frame?,
                None => return Ok(None),
            },
        };
        let rgba: RgbaImage = frame.into_buffer();
        Ok(Some(rgba.convert()))
    }
}

/// Quantizer speed handed to the GIF encoder (1 slowest, 30 fastest).
const ENCODE_SPEED: i32 = 10;

/// Per-frame delay in centiseconds for `frame_rate`, at least 1.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn delay_centis(frame_rate: f64) -> u16 {
    // Clamped to the u16 range before the cast.
    (100.0 / frame_rate).round().clamp(1.0, f64::from(u16::MAX)) as u16
}

/// An open GIF stream.
struct Stream {
    encoder: gif::Encoder<BufWriter<File>>,
    dimensions: Dimensions,
    delay: u16,
}

/// Writes filtered frames as an infinitely looping animated GIF.
///
/// The trailer is written and the file flushed in
/// [`finish`](FrameSink::finish), which reports any write failure.
pub struct GifFrameSink {
    path: PathBuf,
    stream: Option<Stream>,
}

impl GifFrameSink {
    /// Prepare a sink that will create `path` when opened.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
        }
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for GifFrameSink {
    type Error = SinkError;

    fn open(&mut self, format: StreamFormat) -> Result<(), SinkError> {
        if self.stream.is_some() {
            return Err(SinkError::AlreadyOpen);
        }
        let dimensions = format.dimensions();
        let (Ok(width), Ok(height)) = (
            u16::try_from(dimensions.width),
            u16::try_from(dimensions.height),
        ) else {
            return Err(SinkError::TooLarge(dimensions));
        };
        let file = File::create(&self.path).map_err(|source| SinkError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut encoder = gif::Encoder::new(BufWriter::new(file), width, height, &[])?;
        encoder.set_repeat(gif::Repeat::Infinite)?;
        self.stream = Some(Stream {
            encoder,
            dimensions,
            delay: delay_centis(format.frame_rate()),
        });
        tracing::debug!(path = %self.path.display(), "GIF sink opened");
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let stream = self.stream.as_mut().ok_or(SinkError::NotOpen)?;
        let actual = Dimensions::of(frame);
        if actual != stream.dimensions {
            return Err(SinkError::FrameSize {
                expected: stream.dimensions,
                actual,
            });
        }
        // Both axes were checked against u16 in `open`.
        let mut gif_frame = gif::Frame::from_rgb_speed(
            actual.width as u16,
            actual.height as u16,
            frame.as_raw(),
            ENCODE_SPEED,
        );
        gif_frame.delay = stream.delay;
        stream.encoder.write_frame(&gif_frame)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let stream = self.stream.take().ok_or(SinkError::NotOpen)?;
        let write_error = |source| SinkError::Write {
            path: self.path.clone(),
            source,
        };
        let mut writer = stream.encoder.into_inner().map_err(write_error)?;
        writer.flush().map_err(write_error)?;
        writer.get_ref().sync_all().map_err(write_error)?;
        tracing::debug!(path = %self.path.display(), "GIF sink finished");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn flat(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(rgb))
    }

    fn format(width: u32, height: u32, frame_rate: f64) -> StreamFormat {
        StreamFormat::new(Dimensions { width, height }, frame_rate)
    }

    #[test]
    fn delay_to_rate() {
        let tenth = Delay::from_saturating_duration(Duration::from_millis(100));
        assert!((rate_from_delay(tenth) - 10.0).abs() < 1e-9);
        let zero = Delay::from_saturating_duration(Duration::ZERO);
        assert!(rate_from_delay(zero).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_to_delay() {
        assert_eq!(delay_centis(10.0), 10);
        assert_eq!(delay_centis(15.0), 7);
        assert_eq!(delay_centis(1000.0), 1);
        assert_eq!(delay_centis(1e-9), u16::MAX);
    }

    #[test]
    fn frames_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        let colors = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];

        let mut sink = GifFrameSink::new(&path);
        sink.open(format(8, 6, 10.0)).unwrap();
        for rgb in colors {
            sink.write_frame(&flat(8, 6, rgb)).unwrap();
        }
        sink.finish().unwrap();

        let mut source = GifFrameSource::open(&path).unwrap();
        assert_eq!(
            source.dimensions(),
            Some(Dimensions {
                width: 8,
                height: 6
            })
        );
        assert!((source.frame_rate() - 10.0).abs() < 0.5);
        let mut read = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            read.push(frame);
        }
        assert_eq!(read.len(), 3);
        for (frame, rgb) in read.iter().zip(colors) {
            assert_eq!(frame.dimensions(), (8, 6));
            let got = frame.get_pixel(4, 3).0;
            for c in 0..3 {
                assert!(got[c].abs_diff(rgb[c]) <= 8, "expected {rgb:?}, got {got:?}");
            }
        }
    }

    #[test]
    fn write_before_open_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GifFrameSink::new(dir.path().join("never.gif"));
        assert!(matches!(
            sink.write_frame(&flat(2, 2, [0, 0, 0])),
            Err(SinkError::NotOpen)
        ));
        assert!(!sink.path().exists());
    }

    #[test]
    fn double_open_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GifFrameSink::new(dir.path().join("twice.gif"));
        sink.open(format(2, 2, 15.0)).unwrap();
        assert!(matches!(
            sink.open(format(2, 2, 15.0)),
            Err(SinkError::AlreadyOpen)
        ));
    }

    #[test]
    fn unwritable_destination_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GifFrameSink::new(dir.path().join("missing").join("out.gif"));
        assert!(matches!(
            sink.open(format(2, 2, 15.0)),
            Err(SinkError::Open { .. })
        ));
    }

    #[test]
    fn oversized_canvas_is_rejected_before_creating_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GifFrameSink::new(dir.path().join("wide.gif"));
        assert!(matches!(
            sink.open(format(70_000, 2, 15.0)),
            Err(SinkError::TooLarge(_))
        ));
        assert!(!sink.path().exists());
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GifFrameSink::new(dir.path().join("sized.gif"));
        sink.open(format(4, 4, 15.0)).unwrap();
        assert!(matches!(
            sink.write_frame(&flat(5, 4, [9, 9, 9])),
            Err(SinkError::FrameSize { .. })
        ));
    }

    #[test]
    fn finish_without_open_is_rejected() {
        let mut sink = GifFrameSink::new("unused.gif");
        assert!(matches!(sink.finish(), Err(SinkError::NotOpen)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_disk_is_reported() {
        let mut sink = GifFrameSink::new("/dev/full");
        sink.open(format(8, 8, 10.0)).unwrap();
        let result = [[255, 0, 0], [0, 255, 0], [0, 0, 255]]
            .into_iter()
            .try_for_each(|rgb| sink.write_frame(&flat(8, 8, rgb)))
            .and_then(|()| sink.finish());
        assert!(
            matches!(
                result,
                Err(SinkError::Write { .. } | SinkError::Encode(_))
            ),
            "{result:?}"
        );
    }

    #[test]
    fn non_gif_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.gif");
        std::fs::write(&path, b"definitely not a gif").unwrap();
        assert!(matches!(
            GifFrameSource::open(&path),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn missing_input_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GifFrameSource::open(dir.path().join("absent.gif")),
            Err(SourceError::Open { .. })
        ));
    }
}
