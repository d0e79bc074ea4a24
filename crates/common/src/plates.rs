//! License plate recognition contracts shared between the pipeline and its callers.
//!
//! This module defines the geometry, detection and result types that flow out of
//! the recognition pipeline, plus the request/response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

/// Axis-aligned box, either normalized (0..1) or in pixel space depending on context.
///
/// Width and height are never negative; constructors clamp them at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Normalized region covering the whole frame
    pub const fn full_frame() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    /// A normalized region is full-frame when it spans the entire image.
    pub fn is_full_frame(&self) -> bool {
        self.x <= 0.0 && self.y <= 0.0 && self.width >= 1.0 && self.height >= 1.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Convert a pixel-space rect into a normalized one for the given image size
    pub fn normalized(&self, image_width: u32, image_height: u32) -> Option<Rect> {
        if image_width == 0 || image_height == 0 {
            return None;
        }
        let w = image_width as f32;
        let h = image_height as f32;
        let x = (self.x / w).clamp(0.0, 1.0);
        let y = (self.y / h).clamp(0.0, 1.0);
        Some(Rect::new(
            x,
            y,
            (self.width / w).min(1.0 - x),
            (self.height / h).min(1.0 - y),
        ))
    }

    /// Convert a normalized rect into whole-pixel crop coordinates `(x, y, width, height)`,
    /// clamped to the image bounds.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let x = (self.x.clamp(0.0, 1.0) * image_width as f32).floor() as u32;
        let y = (self.y.clamp(0.0, 1.0) * image_height as f32).floor() as u32;
        let x = x.min(image_width);
        let y = y.min(image_height);
        let width = ((self.width.max(0.0) * image_width as f32).ceil() as u32).min(image_width - x);
        let height =
            ((self.height.max(0.0) * image_height as f32).ceil() as u32).min(image_height - y);
        (x, y, width, height)
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::full_frame()
    }
}

/// A plate candidate region produced by the detection decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in pixel space
    pub rect: Rect,

    /// Detector confidence (0.0 to 1.0)
    pub score: f32,

    /// Class index reported by the detector
    pub class_id: i32,
}

/// Which area of the frame the recognition stage scanned
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScannedRegion {
    /// The whole frame
    FullFrame,
    /// A region supplied by the caller
    Requested { rect: Rect },
    /// A region derived from a detection
    Detection { rect: Rect },
}

impl ScannedRegion {
    /// Normalized rect that was handed to the recognizer
    pub fn rect(&self) -> Rect {
        match self {
            ScannedRegion::FullFrame => Rect::full_frame(),
            ScannedRegion::Requested { rect } | ScannedRegion::Detection { rect } => *rect,
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Plate regions found in the captured frame
    pub detections: Vec<Detection>,

    /// Best plate string, if any candidate survived selection
    pub plate: Option<String>,

    /// Region that was scanned by the recognition stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned_region: Option<ScannedRegion>,

    /// Number of raw text candidates pooled before correction
    #[serde(default)]
    pub candidates_pooled: usize,

    /// Wall-clock duration of the run
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl PipelineResult {
    /// Result reported when no plate could be produced
    pub fn no_plate() -> Self {
        Self::default()
    }
}

/// Request body for `POST /v1/detect`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Base64 encoded image (JPEG or PNG)
    pub image: String,
}

/// Response body for `POST /v1/detect`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub detections: Vec<Detection>,
}

/// Request body for `POST /v1/recognize`
///
/// Exactly one of `image` or `source_uri` must be provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognizeRequest {
    /// Base64 encoded image (JPEG or PNG)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Stream or file URI to grab a single frame from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,

    /// Normalized region of interest; omitted means "use the detector"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_clamps_negative_size() {
        let rect = Rect::new(1.0, 2.0, -3.0, -4.0);
        assert_eq!(rect.width, 0.0);
        assert_eq!(rect.height, 0.0);
    }

    #[test]
    fn test_full_frame_detection() {
        assert!(Rect::full_frame().is_full_frame());
        assert!(!Rect::new(0.1, 0.1, 0.5, 0.5).is_full_frame());
    }

    #[test]
    fn test_normalize_pixel_rect() {
        let rect = Rect::new(40.0, 10.0, 80.0, 40.0);
        let normalized = rect.normalized(200, 100).unwrap();
        assert!((normalized.x - 0.2).abs() < 1e-6);
        assert!((normalized.y - 0.1).abs() < 1e-6);
        assert!((normalized.width - 0.4).abs() < 1e-6);
        assert!((normalized.height - 0.4).abs() < 1e-6);

        assert!(rect.normalized(0, 100).is_none());
    }

    #[test]
    fn test_to_pixels_stays_in_bounds() {
        let rect = Rect::new(0.9, 0.9, 0.5, 0.5);
        let (x, y, w, h) = rect.to_pixels(100, 50);
        assert_eq!((x, y), (90, 45));
        assert_eq!((w, h), (10, 5));
    }

    #[test]
    fn test_pipeline_result_serialization() {
        let result = PipelineResult {
            detections: vec![Detection {
                rect: Rect::new(1.0, 2.0, 3.0, 4.0),
                score: 0.9,
                class_id: 0,
            }],
            plate: Some("MH12AB1234".to_string()),
            scanned_region: Some(ScannedRegion::FullFrame),
            candidates_pooled: 3,
            elapsed_ms: 12,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["plate"], "MH12AB1234");
        assert_eq!(json["scanned_region"]["kind"], "full_frame");

        let back: PipelineResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_recognize_request_defaults() {
        let request: RecognizeRequest = serde_json::from_str(r#"{"image":"abc"}"#).unwrap();
        assert_eq!(request.image.as_deref(), Some("abc"));
        assert!(request.source_uri.is_none());
        assert!(request.region.is_none());
    }
}
