//! Capture -> Detect -> Recognize sequencing
//!
//! Each stage is its own [`CancellableTask`] and the next one is only created
//! once the previous has reached `Finished`. Stage failures are logged and
//! degrade the run to "no plate"; a run always completes.

use crate::backend::{FrameSource, InferenceEngine, TextRecognizer};
use crate::config::{PipelineConfig, ProminencePolicy};
use crate::decoder::DetectionDecoder;
use crate::error::PipelineError;
use crate::extractor::TextCandidateExtractor;
use crate::selector::CandidateSelector;
use crate::stages::{
    CaptureWork, DetectWork, RecognitionReport, RecognizeWork, CAPTURE_STAGE, DETECT_STAGE,
    RECOGNIZE_STAGE,
};
use crate::task::{CancellableTask, TaskOutcome};
use anyhow::Result;
use common::{Detection, PipelineResult, Rect, ScannedRegion};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics::{
    LPR_ACTIVE_PIPELINES, LPR_CAPTURE_TIMEOUTS, LPR_PIPELINE_RUNS, LPR_STAGE_DURATION,
    LPR_STAGE_RUNS,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    engine: Arc<dyn InferenceEngine>,
    recognizer: Arc<dyn TextRecognizer>,
    decoder: DetectionDecoder,
    extractor: TextCandidateExtractor,
    selector: Arc<CandidateSelector>,
    scope: CancellationToken,
}

/// Counts a run in `LPR_ACTIVE_PIPELINES` until dropped
struct ActiveRun;

impl ActiveRun {
    fn enter() -> Self {
        LPR_ACTIVE_PIPELINES.inc();
        ActiveRun
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        LPR_ACTIVE_PIPELINES.dec();
    }
}

/// Start a stage, wait for `Finished`, record it and return its outcome
async fn run_stage<T>(task: &CancellableTask<T>) -> TaskOutcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    let timer = LPR_STAGE_DURATION
        .with_label_values(&[task.name()])
        .start_timer();
    task.start();
    let outcome = task.wait().await;
    timer.observe_duration();

    LPR_STAGE_RUNS
        .with_label_values(&[task.name(), outcome.label()])
        .inc();
    if let TaskOutcome::Failed(err) = &outcome {
        if matches!(err, PipelineError::Timeout(_)) && task.name() == CAPTURE_STAGE {
            LPR_CAPTURE_TIMEOUTS.inc();
        }
        warn!(stage = task.name(), error = %err, "stage failed, continuing without its output");
    }
    outcome
}

/// Pick the detection carried forward to recognition
pub fn prominent_detection(
    detections: &[Detection],
    policy: ProminencePolicy,
) -> Option<&Detection> {
    match policy {
        ProminencePolicy::First => detections.first(),
        ProminencePolicy::HighestScore => detections.iter().fold(None, |best, d| match best {
            Some(current) if current.score >= d.score => Some(current),
            _ => Some(d),
        }),
    }
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn InferenceEngine>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Result<Self> {
        Ok(Self {
            decoder: DetectionDecoder::from_config(&config),
            extractor: TextCandidateExtractor::from_config(&config),
            selector: Arc::new(CandidateSelector::new()?),
            config,
            engine,
            recognizer,
            scope: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cancellation scope every stage task is created in
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Cancel every run. Stages not yet started finish empty; running stages
    /// stop at their next checkpoint. The orchestrator stays cancelled.
    pub fn cancel(&self) {
        info!("cancelling pipeline scope");
        self.scope.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    fn detect_task(
        &self,
        image: Arc<DynamicImage>,
        scope: &CancellationToken,
    ) -> CancellableTask<Vec<Detection>> {
        CancellableTask::in_scope(
            DETECT_STAGE,
            DetectWork::new(self.engine.clone(), self.decoder.clone(), image),
            scope,
        )
    }

    fn recognize_task(
        &self,
        image: Arc<DynamicImage>,
        roi: Rect,
        scope: &CancellationToken,
    ) -> CancellableTask<RecognitionReport> {
        CancellableTask::in_scope(
            RECOGNIZE_STAGE,
            RecognizeWork::new(
                self.recognizer.clone(),
                self.extractor.clone(),
                self.selector.clone(),
                image,
                roi,
            ),
            scope,
        )
    }

    /// Region handed to recognition: the caller's, else the prominent
    /// detection, else the whole frame
    pub fn scan_region(
        &self,
        requested: Option<Rect>,
        detections: &[Detection],
        image_width: u32,
        image_height: u32,
    ) -> ScannedRegion {
        if let Some(rect) = requested {
            return if rect.is_full_frame() {
                ScannedRegion::FullFrame
            } else {
                ScannedRegion::Requested { rect }
            };
        }
        prominent_detection(detections, self.config.prominence)
            .and_then(|d| d.rect.normalized(image_width, image_height))
            .filter(|rect| rect.area() > 0.0)
            .map(|rect| ScannedRegion::Detection { rect })
            .unwrap_or(ScannedRegion::FullFrame)
    }

    /// Capture a frame, detect plates, recognize the plate text.
    ///
    /// A capture without an image ends the run with no plate; recognition
    /// is never started in that case. Dropping the returned future cancels
    /// whichever stage is in flight.
    #[instrument(skip_all, fields(requested = requested.is_some()))]
    pub async fn run(
        &self,
        source: Arc<dyn FrameSource>,
        requested: Option<Rect>,
    ) -> PipelineResult {
        let started = Instant::now();
        let _active = ActiveRun::enter();
        let run_scope = self.scope.child_token();
        let _cancel_on_drop = run_scope.clone().drop_guard();

        let capture = CancellableTask::in_scope(CAPTURE_STAGE, CaptureWork::new(source), &run_scope)
            .with_timeout(self.config.capture_timeout());

        let mut result = PipelineResult::default();
        let outcome_label = match run_stage(&capture).await.into_value() {
            None => "no_image",
            Some(image) => {
                let detect = self.detect_task(image.clone(), &run_scope);
                result.detections = run_stage(&detect).await.into_value().unwrap_or_default();

                let region =
                    self.scan_region(requested, &result.detections, image.width(), image.height());
                let recognize = self.recognize_task(image, region.rect(), &run_scope);
                let report = run_stage(&recognize).await.into_value().unwrap_or_default();

                result.scanned_region = Some(region);
                result.candidates_pooled = report.candidates_pooled;
                result.plate = report.plate;
                if result.plate.is_some() {
                    "plate"
                } else {
                    "no_plate"
                }
            }
        };

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        LPR_PIPELINE_RUNS.with_label_values(&[outcome_label]).inc();
        info!(
            outcome = outcome_label,
            plate = result.plate.as_deref().unwrap_or("-"),
            detections = result.detections.len(),
            elapsed_ms = result.elapsed_ms,
            "pipeline run finished"
        );
        result
    }

    /// Run the pipeline as a task of its own; `on_complete` fires exactly once
    pub fn submit<F>(
        self: &Arc<Self>,
        source: Arc<dyn FrameSource>,
        requested: Option<Rect>,
        on_complete: F,
    ) -> CancellableTask<PipelineResult>
    where
        F: FnOnce(PipelineResult) + Send + 'static,
    {
        let orchestrator = self.clone();
        let task = self.scoped_fn("pipeline", move || async move {
            TaskOutcome::Completed(orchestrator.run(source, requested).await)
        });
        task.on_complete(move |outcome| {
            on_complete(outcome.value().cloned().unwrap_or_default())
        });
        task.start();
        task
    }

    /// Detect plate regions in an image (pixel space)
    pub async fn detect(&self, image: Arc<DynamicImage>) -> Vec<Detection> {
        let call_scope = self.scope.child_token();
        let _cancel_on_drop = call_scope.clone().drop_guard();
        let task = self.detect_task(image, &call_scope);
        run_stage(&task).await.into_value().unwrap_or_default()
    }

    /// Detect plate regions in an image and call back with the list
    pub fn detect_with_callback<F>(
        self: &Arc<Self>,
        image: Arc<DynamicImage>,
        on_complete: F,
    ) -> CancellableTask<Vec<Detection>>
    where
        F: FnOnce(Vec<Detection>) + Send + 'static,
    {
        let orchestrator = self.clone();
        let task = self.scoped_fn(DETECT_STAGE, move || async move {
            TaskOutcome::Completed(orchestrator.detect(image).await)
        });
        task.on_complete(move |outcome| on_complete(outcome.value().cloned().unwrap_or_default()));
        task.start();
        task
    }

    /// Recognize the plate inside normalized `region` of an image
    pub async fn recognize(&self, image: Arc<DynamicImage>, region: Rect) -> RecognitionReport {
        let call_scope = self.scope.child_token();
        let _cancel_on_drop = call_scope.clone().drop_guard();
        let task = self.recognize_task(image, region, &call_scope);
        run_stage(&task).await.into_value().unwrap_or_default()
    }

    /// Recognize the plate in `region` and call back with the plate, if any
    pub fn recognize_with_callback<F>(
        self: &Arc<Self>,
        image: Arc<DynamicImage>,
        region: Rect,
        on_complete: F,
    ) -> CancellableTask<RecognitionReport>
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let orchestrator = self.clone();
        let task = self.scoped_fn(RECOGNIZE_STAGE, move || async move {
            TaskOutcome::Completed(orchestrator.recognize(image, region).await)
        });
        task.on_complete(move |outcome| {
            on_complete(outcome.value().and_then(|report| report.plate.clone()))
        });
        task.start();
        task
    }

    fn scoped_fn<T, F, Fut>(&self, name: &'static str, f: F) -> CancellableTask<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        CancellableTask::from_fn_in_scope(name, move |_ctx| f(), &self.scope)
    }
}
