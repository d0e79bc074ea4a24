//! Detector output decoding
//!
//! Turns the SSD-style tensor bundle `{boxes, scores, classes, count}` into
//! pixel-space plate rectangles. Every offset read is bounds checked; a
//! malformed bundle decodes to nothing.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use common::{Detection, Rect};
use tracing::{debug, warn};

/// Flat little-endian `f32` buffer as handed over by an inference runtime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTensor {
    bytes: Vec<u8>,
}

impl RawTensor {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_f32s(values: &[f32]) -> Self {
        Self {
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Number of whole `f32` values in the buffer
    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the `index`th value, or `None` if it lies past the buffer
    pub fn read_f32(&self, index: usize) -> Option<f32> {
        let start = index.checked_mul(4)?;
        let end = start.checked_add(4)?;
        let chunk = self.bytes.get(start..end)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        Some(f32::from_le_bytes(word))
    }
}

/// Raw detector outputs
///
/// `boxes` holds `(y1, x1, y2, x2)` quadruples normalized to `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct TensorBundle {
    pub boxes: RawTensor,
    pub scores: RawTensor,
    pub classes: RawTensor,
    pub count: RawTensor,
}

/// Hard cap on detector entries read from one bundle
pub const MAX_DETECTIONS: usize = 10;

/// Decodes detector output into plate detections
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
    score_threshold: f32,
    plate_class_id: i32,
    max_detections: usize,
}

impl DetectionDecoder {
    /// `max_detections` is clamped to [`MAX_DETECTIONS`]
    pub fn new(score_threshold: f32, plate_class_id: i32, max_detections: usize) -> Self {
        Self {
            score_threshold,
            plate_class_id,
            max_detections: max_detections.min(MAX_DETECTIONS),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.score_threshold,
            config.plate_class_id,
            config.max_detections,
        )
    }

    /// Number of entries to iterate: `min(count, max_detections)`, never
    /// more than [`MAX_DETECTIONS`]
    fn entry_count(&self, bundle: &TensorBundle) -> usize {
        let Some(count) = bundle.count.read_f32(0) else {
            warn!("detector count tensor is empty");
            return 0;
        };
        if !count.is_finite() || count <= 0.0 {
            return 0;
        }
        (count as usize).min(self.max_detections.min(MAX_DETECTIONS))
    }

    /// Decode `bundle` against an image of `image_width` x `image_height`
    /// pixels. Overlapping boxes are all kept, in tensor order. A malformed
    /// bundle yields no detections.
    pub fn decode(
        &self,
        bundle: &TensorBundle,
        image_width: u32,
        image_height: u32,
    ) -> Vec<Detection> {
        self.try_decode(bundle, image_width, image_height)
            .unwrap_or_else(|e| {
                warn!(error = %e, "dropping detector output");
                Vec::new()
            })
    }

    /// Like [`decode`](Self::decode) but reports undersized buffers
    pub fn try_decode(
        &self,
        bundle: &TensorBundle,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<Detection>, PipelineError> {
        let n = self.entry_count(bundle);
        if n == 0 {
            return Ok(Vec::new());
        }

        if bundle.boxes.len() < n * 4 || bundle.scores.len() < n || bundle.classes.len() < n {
            return Err(PipelineError::MalformedTensor(format!(
                "{} entries but boxes={} scores={} classes={}",
                n,
                bundle.boxes.len(),
                bundle.scores.len(),
                bundle.classes.len()
            )));
        }

        let width = image_width as f32;
        let height = image_height as f32;
        let mut detections = Vec::new();

        for i in 0..n {
            let (Some(score), Some(class)) = (bundle.scores.read_f32(i), bundle.classes.read_f32(i))
            else {
                break;
            };
            if score.is_nan() || score < self.score_threshold {
                continue;
            }
            if class.round() as i32 != self.plate_class_id {
                continue;
            }

            let base = i * 4;
            let (Some(y1), Some(x1), Some(y2), Some(x2)) = (
                bundle.boxes.read_f32(base),
                bundle.boxes.read_f32(base + 1),
                bundle.boxes.read_f32(base + 2),
                bundle.boxes.read_f32(base + 3),
            ) else {
                break;
            };

            let rect = Rect::new(
                x1 * width,
                y1 * height,
                (x2 - x1) * width,
                (y2 - y1) * height,
            );
            detections.push(Detection {
                rect,
                score,
                class_id: self.plate_class_id,
            });
        }

        debug!(entries = n, kept = detections.len(), "decoded detector output");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn bundle(count: f32, boxes: &[f32], scores: &[f32], classes: &[f32]) -> TensorBundle {
        TensorBundle {
            boxes: RawTensor::from_f32s(boxes),
            scores: RawTensor::from_f32s(scores),
            classes: RawTensor::from_f32s(classes),
            count: RawTensor::from_f32s(&[count]),
        }
    }

    #[test]
    fn test_threshold_and_class_filter() {
        let decoder = DetectionDecoder::new(0.5, 1, 10);
        let bundle = bundle(
            3.0,
            &[
                0.1, 0.2, 0.5, 0.6, //
                0.0, 0.0, 0.5, 0.5, //
                0.3, 0.3, 0.4, 0.9,
            ],
            &[0.9, 0.4, 0.6],
            &[1.0, 1.0, 1.0],
        );

        let detections = decoder.decode(&bundle, 200, 100);
        assert_eq!(detections.len(), 2);
        assert!(approx(detections[0].score, 0.9));
        assert!(approx(detections[1].score, 0.6));
    }

    #[test]
    fn test_denormalizes_to_pixels() {
        let decoder = DetectionDecoder::new(0.5, 1, 10);
        let bundle = bundle(1.0, &[0.1, 0.2, 0.5, 0.6], &[0.9], &[1.0]);

        let detections = decoder.decode(&bundle, 200, 100);
        let rect = detections[0].rect;
        assert!(approx(rect.x, 40.0));
        assert!(approx(rect.y, 10.0));
        assert!(approx(rect.width, 80.0));
        assert!(approx(rect.height, 40.0));
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_class_is_rounded() {
        let decoder = DetectionDecoder::new(0.5, 1, 10);
        let bundle = bundle(
            2.0,
            &[0.1, 0.1, 0.2, 0.2, 0.1, 0.1, 0.2, 0.2],
            &[0.8, 0.8],
            &[0.9999, 1.6],
        );

        let detections = decoder.decode(&bundle, 100, 100);
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_count_is_capped() {
        let decoder = DetectionDecoder::new(0.5, 0, 10);
        // Twelve valid entries, count claims 50.
        let boxes: Vec<f32> = (0..12).flat_map(|_| [0.1, 0.1, 0.2, 0.2]).collect();
        let scores = vec![0.9; 12];
        let classes = vec![0.0; 12];
        let bundle = bundle(50.0, &boxes, &scores, &classes);

        assert_eq!(decoder.decode(&bundle, 100, 100).len(), 10);
    }

    #[test]
    fn test_configured_cap_cannot_exceed_hard_cap() {
        let config: PipelineConfig = serde_json::from_str(r#"{"max_detections": 50}"#).unwrap();
        let decoder = DetectionDecoder::from_config(&config);
        let boxes: Vec<f32> = (0..12).flat_map(|_| [0.1, 0.1, 0.2, 0.2]).collect();
        let bundle = bundle(12.0, &boxes, &[0.9; 12], &[0.0; 12]);
        assert_eq!(decoder.decode(&bundle, 100, 100).len(), MAX_DETECTIONS);

        let huge = DetectionDecoder::new(0.5, 0, usize::MAX);
        let bundle = bundle_with_count(f32::MAX);
        assert!(huge.try_decode(&bundle, 100, 100).is_err());
    }

    #[test]
    fn test_undersized_buffer_is_empty() {
        let decoder = DetectionDecoder::new(0.5, 0, 10);
        // count says 3, only two score entries.
        let bundle = bundle(
            3.0,
            &[0.1, 0.1, 0.2, 0.2, 0.1, 0.1, 0.2, 0.2, 0.1, 0.1, 0.2, 0.2],
            &[0.9, 0.9],
            &[0.0, 0.0, 0.0],
        );
        assert!(decoder.decode(&bundle, 100, 100).is_empty());
        assert!(matches!(
            decoder.try_decode(&bundle, 100, 100),
            Err(PipelineError::MalformedTensor(_))
        ));

        let truncated_boxes = TensorBundle {
            boxes: RawTensor::from_bytes(vec![0u8; 7]),
            ..bundle_with_count(1.0)
        };
        assert!(decoder.decode(&truncated_boxes, 100, 100).is_empty());
    }

    fn bundle_with_count(count: f32) -> TensorBundle {
        bundle(count, &[0.1, 0.1, 0.2, 0.2], &[0.9], &[0.0])
    }

    #[test]
    fn test_invalid_count() {
        let decoder = DetectionDecoder::new(0.5, 0, 10);
        assert!(decoder.decode(&bundle_with_count(-2.0), 100, 100).is_empty());
        assert!(decoder.decode(&bundle_with_count(f32::NAN), 100, 100).is_empty());
        assert!(decoder
            .decode(&TensorBundle::default(), 100, 100)
            .is_empty());
    }

    #[test]
    fn test_inverted_box_has_zero_size() {
        let decoder = DetectionDecoder::new(0.5, 0, 10);
        let bundle = bundle(1.0, &[0.5, 0.5, 0.2, 0.2], &[0.9], &[0.0]);
        let detections = decoder.decode(&bundle, 100, 100);
        assert_eq!(detections[0].rect.width, 0.0);
        assert_eq!(detections[0].rect.height, 0.0);
    }

    #[test]
    fn test_raw_tensor_reads() {
        let tensor = RawTensor::from_f32s(&[1.5, -2.0]);
        assert_eq!(tensor.len(), 2);
        assert_eq!(tensor.read_f32(1), Some(-2.0));
        assert_eq!(tensor.read_f32(2), None);
        assert_eq!(tensor.read_f32(usize::MAX), None);
    }
}
