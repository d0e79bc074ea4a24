//! Scripted collaborators shared by the integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use common::Rect;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lpr_service::backend::{
    CaptureSink, FrameSource, InferenceEngine, RecognitionLevel, RecognitionOptions,
    TextObservation, TextRecognizer,
};
use lpr_service::decoder::{RawTensor, TensorBundle};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn frame(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 200, 200])))
}

pub fn png_base64(width: u32, height: u32) -> String {
    use base64::Engine;
    let mut bytes = Vec::new();
    frame(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Detector that always reports the same boxes; `(y1, x1, y2, x2, score)`
pub struct FixedDetector {
    boxes: Vec<(f32, f32, f32, f32, f32)>,
    class_id: f32,
}

impl FixedDetector {
    pub fn new(boxes: Vec<(f32, f32, f32, f32, f32)>) -> Self {
        Self {
            boxes,
            class_id: 0.0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl InferenceEngine for FixedDetector {
    fn infer(&self, _image: &DynamicImage) -> Result<TensorBundle> {
        let boxes: Vec<f32> = self
            .boxes
            .iter()
            .flat_map(|(y1, x1, y2, x2, _)| [*y1, *x1, *y2, *x2])
            .collect();
        let scores: Vec<f32> = self.boxes.iter().map(|b| b.4).collect();
        let classes = vec![self.class_id; self.boxes.len()];
        Ok(TensorBundle {
            boxes: RawTensor::from_f32s(&boxes),
            scores: RawTensor::from_f32s(&scores),
            classes: RawTensor::from_f32s(&classes),
            count: RawTensor::from_f32s(&[self.boxes.len() as f32]),
        })
    }
}

pub struct FailingDetector;

impl InferenceEngine for FailingDetector {
    fn infer(&self, _image: &DynamicImage) -> Result<TensorBundle> {
        Err(anyhow!("detector offline"))
    }
}

/// Recognizer that answers every accurate pass with the same observation
/// and records each region it was asked to read
pub struct FixedRecognizer {
    reading: Option<(String, f32)>,
    calls: AtomicUsize,
    regions: Mutex<Vec<Rect>>,
}

impl FixedRecognizer {
    /// `reading` at glyph height `height` on accurate passes
    pub fn reading(text: &str, height: f32) -> Self {
        Self {
            reading: Some((text.to_string(), height)),
            calls: AtomicUsize::new(0),
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self {
            reading: None,
            calls: AtomicUsize::new(0),
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn regions(&self) -> Vec<Rect> {
        self.regions.lock().unwrap().clone()
    }
}

impl TextRecognizer for FixedRecognizer {
    fn recognize(
        &self,
        _image: &DynamicImage,
        roi: &Rect,
        options: &RecognitionOptions,
    ) -> Result<Vec<TextObservation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.regions.lock().unwrap().push(*roi);

        match (&self.reading, options.level) {
            (Some((text, height)), RecognitionLevel::Accurate) => Ok(vec![TextObservation {
                candidates: vec![text.clone()],
                bounding_box: Rect::new(0.05, 0.2, 0.9, *height),
            }]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Source that reports `Began` and then never finishes
#[derive(Default)]
pub struct StalledFrameSource {
    held: Mutex<Vec<CaptureSink>>,
}

impl StalledFrameSource {
    /// Whether every capture handed to this source has been abandoned
    pub fn all_abandoned(&self) -> bool {
        self.held.lock().unwrap().iter().all(CaptureSink::is_closed)
    }

    pub fn captures(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl FrameSource for StalledFrameSource {
    fn capture(&self, sink: CaptureSink) {
        sink.began();
        self.held.lock().unwrap().push(sink);
    }
}

pub struct BrokenFrameSource;

impl FrameSource for BrokenFrameSource {
    fn capture(&self, sink: CaptureSink) {
        sink.began();
        sink.finished(Err(anyhow!("camera unplugged")));
    }
}
