//! Filtering an animated GIF end to end through the sequencer.

#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use std::ops::ControlFlow;

use retroframe_io::{GifFrameSink, GifFrameSource};
use retroframe_pipeline::{
    Dimensions, FilterConfig, FrameSequencer, FrameSink, FrameSource, RgbImage, StreamFormat,
};

fn write_clip(path: &std::path::Path, frames: u32, frame_rate: f64) {
    let mut sink = GifFrameSink::new(path);
    sink.open(StreamFormat::new(
        Dimensions {
            width: 40,
            height: 30,
        },
        frame_rate,
    ))
    .unwrap();
    for i in 0..frames {
        let frame = RgbImage::from_fn(40, 30, |x, y| {
            if (x + i * 4) % 20 < 10 {
                image::Rgb([230, 40, 40])
            } else {
                image::Rgb([(y * 8) as u8, 90, 200])
            }
        });
        sink.write_frame(&frame).unwrap();
    }
    sink.finish().unwrap();
}

fn config() -> FilterConfig {
    FilterConfig {
        target_width: 20,
        palette_colors: 4,
        ..FilterConfig::default()
    }
}

#[test]
fn gif_to_gif_keeps_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gif");
    let output = dir.path().join("out.gif");
    write_clip(&input, 5, 10.0);

    let mut source = GifFrameSource::open(&input).unwrap();
    let mut sink = GifFrameSink::new(&output);
    let summary = FrameSequencer::new(config())
        .unwrap()
        .run(&mut source, &mut sink)
        .unwrap();

    assert_eq!(summary.frames, 5);
    let format = summary.format.unwrap();
    assert_eq!(
        format.dimensions(),
        Dimensions {
            width: 40,
            height: 30
        }
    );
    assert!((format.frame_rate() - 10.0).abs() < 0.5);

    let mut reread = GifFrameSource::open(&output).unwrap();
    let mut count = 0;
    while let Some(frame) = reread.next_frame().unwrap() {
        assert_eq!(frame.dimensions(), (40, 30));
        count += 1;
    }
    assert_eq!(count, 5);
}

#[test]
fn early_stop_still_produces_a_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gif");
    let output = dir.path().join("out.gif");
    write_clip(&input, 6, 20.0);

    let mut source = GifFrameSource::open(&input).unwrap();
    let mut sink = GifFrameSink::new(&output);
    let summary = FrameSequencer::new(config())
        .unwrap()
        .run_with(&mut source, &mut sink, |index, _| {
            if index == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
    assert!(summary.stopped_early);
    assert_eq!(summary.frames, 2);

    let mut reread = GifFrameSource::open(&output).unwrap();
    let mut count = 0;
    while reread.next_frame().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 2);
}
