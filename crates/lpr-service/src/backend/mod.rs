//! Collaborator seams
//!
//! The pipeline never talks to a camera, an inference runtime or an OCR
//! engine directly. It goes through the traits in this module; concrete
//! adapters live in the submodules.

pub mod capture;
pub mod onnx;

use crate::decoder::TensorBundle;
use anyhow::Result;
use common::Rect;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

pub use capture::{FfmpegFrameSource, StillFrameSource};
pub use onnx::{OnnxPlateDetector, OnnxTextRecognizer, OnnxSettings};

/// Signals emitted by a frame source during one capture
#[derive(Debug)]
pub enum CaptureEvent {
    /// The source accepted the request; more signals follow
    Began,
    /// Final signal; only this one completes the capture
    Finished(Result<DynamicImage>),
}

/// Single-capture completion sink handed to a [`FrameSource`]
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn began(&self) {
        self.send(CaptureEvent::Began);
    }

    pub fn finished(&self, result: Result<DynamicImage>) {
        self.send(CaptureEvent::Finished(result));
    }

    /// True once the capture stage stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: CaptureEvent) {
        // The capture stage may already have given up on this source.
        if self.tx.send(event).is_err() {
            debug!("capture signal dropped, stage already finished");
        }
    }
}

/// Delivers one frame per `capture` call through the sink.
///
/// Implementations must return promptly and report asynchronously. A source
/// that never calls `finished` is cut off by the capture watchdog.
pub trait FrameSource: Send + Sync {
    fn capture(&self, sink: CaptureSink);
}

/// Runs the plate detector and hands back its raw output tensors
pub trait InferenceEngine: Send + Sync {
    fn infer(&self, image: &DynamicImage) -> Result<TensorBundle>;
}

/// OCR quality setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionLevel {
    Fast,
    Accurate,
}

impl RecognitionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionLevel::Fast => "fast",
            RecognitionLevel::Accurate => "accurate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub level: RecognitionLevel,
    /// Vocabulary used to bias correction in accurate mode
    pub custom_words: Vec<String>,
}

impl RecognitionOptions {
    pub fn fast() -> Self {
        Self {
            level: RecognitionLevel::Fast,
            custom_words: Vec::new(),
        }
    }

    pub fn accurate(custom_words: Vec<String>) -> Self {
        Self {
            level: RecognitionLevel::Accurate,
            custom_words,
        }
    }
}

/// One line of text found by the recognizer
#[derive(Debug, Clone, PartialEq)]
pub struct TextObservation {
    /// Ranked readings, best first
    pub candidates: Vec<String>,
    /// Glyph geometry, normalized to the region of interest
    pub bounding_box: Rect,
}

/// Reads text lines inside a normalized region of interest
pub trait TextRecognizer: Send + Sync {
    fn recognize(
        &self,
        image: &DynamicImage,
        roi: &Rect,
        options: &RecognitionOptions,
    ) -> Result<Vec<TextObservation>>;
}
