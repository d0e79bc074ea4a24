//! Frame sources for a single capture

use super::{CaptureSink, FrameSource};
use anyhow::{Context, Result};
use common::frame_extractor::{grab_frame_png, FrameGrabOptions};
use common::validation::validate_frame_dimensions;
use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

fn decode_frame(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes).context("Failed to decode frame")?;
    validate_frame_dimensions(image.width(), image.height())?;
    Ok(image)
}

enum StillFrame {
    Encoded(Arc<[u8]>),
    Decoded(Arc<DynamicImage>),
}

/// Delivers a frame the caller already holds
pub struct StillFrameSource {
    frame: StillFrame,
}

impl StillFrameSource {
    /// Encoded bytes (PNG, JPEG, ...), decoded on a blocking worker
    pub fn encoded(bytes: Vec<u8>) -> Self {
        Self {
            frame: StillFrame::Encoded(bytes.into()),
        }
    }

    pub fn decoded(image: DynamicImage) -> Self {
        Self {
            frame: StillFrame::Decoded(Arc::new(image)),
        }
    }
}

impl FrameSource for StillFrameSource {
    fn capture(&self, sink: CaptureSink) {
        sink.began();
        match &self.frame {
            StillFrame::Decoded(image) => sink.finished(Ok(image.as_ref().clone())),
            StillFrame::Encoded(bytes) => {
                let bytes = bytes.clone();
                tokio::task::spawn_blocking(move || {
                    debug!(size_bytes = bytes.len(), "decoding still frame");
                    sink.finished(decode_frame(&bytes));
                });
            }
        }
    }
}

/// Grabs one frame from a stream or file URI with FFmpeg
pub struct FfmpegFrameSource {
    uri: String,
    options: FrameGrabOptions,
}

impl FfmpegFrameSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            options: FrameGrabOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FrameGrabOptions) -> Self {
        self.options = options;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl FrameSource for FfmpegFrameSource {
    fn capture(&self, sink: CaptureSink) {
        let uri = self.uri.clone();
        let options = self.options.clone();
        sink.began();
        tokio::task::spawn_blocking(move || {
            if sink.is_closed() {
                debug!(uri = %uri, "capture abandoned before frame grab");
                return;
            }
            let result = grab_frame_png(&uri, &options)
                .with_context(|| format!("Failed to grab frame from {uri}"))
                .and_then(|png| decode_frame(&png));
            sink.finished(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CaptureEvent;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(40, 20))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_still_frame_began_then_finished() {
        let (sink, mut rx) = CaptureSink::channel();
        StillFrameSource::encoded(png_bytes()).capture(sink);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::Began)));
        match rx.recv().await {
            Some(CaptureEvent::Finished(Ok(image))) => {
                assert_eq!((image.width(), image.height()), (40, 20));
            }
            other => panic!("unexpected capture event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_still_frame_garbage_reports_error() {
        let (sink, mut rx) = CaptureSink::channel();
        StillFrameSource::encoded(b"not an image".to_vec()).capture(sink);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::Began)));
        assert!(matches!(rx.recv().await, Some(CaptureEvent::Finished(Err(_)))));
    }

    #[tokio::test]
    async fn test_ffmpeg_rejects_unsafe_uri() {
        let (sink, mut rx) = CaptureSink::channel();
        FfmpegFrameSource::new("rtsp://cam/stream; rm -rf /").capture(sink);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::Began)));
        assert!(matches!(rx.recv().await, Some(CaptureEvent::Finished(Err(_)))));
    }
}
