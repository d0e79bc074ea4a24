//! The three pipeline stages as task work
//!
//! Each stage absorbs collaborator errors into its outcome. Nothing here
//! panics or aborts a run.

use crate::backend::{CaptureEvent, CaptureSink, FrameSource, InferenceEngine, TextRecognizer};
use crate::corrector::correct;
use crate::decoder::DetectionDecoder;
use crate::error::PipelineError;
use crate::extractor::TextCandidateExtractor;
use crate::selector::{CandidateSelector, SelectionTier};
use crate::task::{TaskContext, TaskOutcome, TaskWork};
use async_trait::async_trait;
use common::{Detection, Rect};
use image::DynamicImage;
use std::collections::BTreeSet;
use std::sync::Arc;
use telemetry::metrics::{LPR_DETECTIONS, LPR_PLATES};
use tracing::{debug, info};

pub const CAPTURE_STAGE: &str = "capture";
pub const DETECT_STAGE: &str = "detect";
pub const RECOGNIZE_STAGE: &str = "recognize";

/// Waits for the frame source's final signal
pub struct CaptureWork {
    source: Arc<dyn FrameSource>,
}

impl CaptureWork {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl TaskWork for CaptureWork {
    type Output = Arc<DynamicImage>;

    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskOutcome<Arc<DynamicImage>> {
        let (sink, mut events) = CaptureSink::channel();
        self.source.capture(sink);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return TaskOutcome::Empty,
                _ = ctx.finished() => return TaskOutcome::Empty,
                event = events.recv() => match event {
                    Some(CaptureEvent::Began) => debug!("capture began"),
                    Some(CaptureEvent::Finished(Ok(image))) => {
                        debug!(width = image.width(), height = image.height(), "frame captured");
                        return TaskOutcome::Completed(Arc::new(image));
                    }
                    Some(CaptureEvent::Finished(Err(e))) => {
                        return TaskOutcome::Failed(PipelineError::resource("capture", format!("{e:#}")));
                    }
                    None => {
                        return TaskOutcome::Failed(PipelineError::resource(
                            "capture",
                            "frame source closed without finishing",
                        ));
                    }
                },
            }
        }
    }
}

/// Runs the detector and decodes its tensors on a blocking worker
pub struct DetectWork {
    engine: Arc<dyn InferenceEngine>,
    decoder: DetectionDecoder,
    image: Arc<DynamicImage>,
}

impl DetectWork {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        decoder: DetectionDecoder,
        image: Arc<DynamicImage>,
    ) -> Self {
        Self {
            engine,
            decoder,
            image,
        }
    }
}

#[async_trait]
impl TaskWork for DetectWork {
    type Output = Vec<Detection>;

    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskOutcome<Vec<Detection>> {
        if ctx.checkpoint().is_err() {
            return TaskOutcome::Empty;
        }

        let DetectWork {
            engine,
            decoder,
            image,
        } = *self;
        let joined = tokio::task::spawn_blocking(move || {
            let bundle = engine
                .infer(&image)
                .map_err(|e| PipelineError::resource("inference", format!("{e:#}")))?;
            Ok::<_, PipelineError>(decoder.decode(&bundle, image.width(), image.height()))
        })
        .await;

        match joined {
            Ok(Ok(detections)) => {
                LPR_DETECTIONS.inc_by(detections.len() as u64);
                TaskOutcome::Completed(detections)
            }
            Ok(Err(e)) => TaskOutcome::Failed(e),
            Err(e) => TaskOutcome::Failed(PipelineError::resource("inference", e)),
        }
    }
}

/// What the recognize stage produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionReport {
    pub plate: Option<String>,
    pub tier: Option<SelectionTier>,
    /// Raw readings pooled across all passes, before correction
    pub candidates_pooled: usize,
}

/// Extract, correct and select on one blocking worker
pub struct RecognizeWork {
    recognizer: Arc<dyn TextRecognizer>,
    extractor: TextCandidateExtractor,
    selector: Arc<CandidateSelector>,
    image: Arc<DynamicImage>,
    roi: Rect,
}

impl RecognizeWork {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        extractor: TextCandidateExtractor,
        selector: Arc<CandidateSelector>,
        image: Arc<DynamicImage>,
        roi: Rect,
    ) -> Self {
        Self {
            recognizer,
            extractor,
            selector,
            image,
            roi,
        }
    }
}

#[async_trait]
impl TaskWork for RecognizeWork {
    type Output = RecognitionReport;

    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskOutcome<RecognitionReport> {
        let RecognizeWork {
            recognizer,
            extractor,
            selector,
            image,
            roi,
        } = *self;
        let cancel = ctx.token();

        let joined = tokio::task::spawn_blocking(move || {
            let raw = extractor.extract(recognizer.as_ref(), &image, &roi, &cancel)?;
            let pooled: BTreeSet<String> = raw
                .iter()
                .map(|candidate| correct(&candidate.raw))
                .filter(|corrected| !corrected.is_empty())
                .collect();

            let selection = selector.select(&pooled, roi.is_full_frame());
            Ok::<_, PipelineError>(RecognitionReport {
                candidates_pooled: raw.len(),
                tier: selection.as_ref().map(|s| s.tier),
                plate: selection.map(|s| s.plate),
            })
        })
        .await;

        match joined {
            Ok(Ok(report)) => {
                let tier = report.tier.map(|t| t.as_str()).unwrap_or("none");
                LPR_PLATES.with_label_values(&[tier]).inc();
                info!(
                    plate = report.plate.as_deref().unwrap_or("-"),
                    tier,
                    pooled = report.candidates_pooled,
                    "recognition done"
                );
                TaskOutcome::Completed(report)
            }
            Ok(Err(e)) => TaskOutcome::from(Err(e)),
            Err(e) => TaskOutcome::Failed(PipelineError::resource("ocr", e)),
        }
    }
}
