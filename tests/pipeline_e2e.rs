/// End-to-end tests for the capture, detect, recognize pipeline with
/// scripted collaborators
mod support;

use common::{Rect, ScannedRegion};
use lpr_service::backend::{FrameSource, InferenceEngine, StillFrameSource, TextRecognizer};
use lpr_service::{PipelineConfig, PipelineOrchestrator, TaskState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{
    frame, BrokenFrameSource, FailingDetector, FixedDetector, FixedRecognizer, StalledFrameSource,
};

fn orchestrator(
    detector: impl InferenceEngine + 'static,
    recognizer: Arc<FixedRecognizer>,
) -> Arc<PipelineOrchestrator> {
    let recognizer: Arc<dyn TextRecognizer> = recognizer;
    Arc::new(
        PipelineOrchestrator::new(PipelineConfig::default(), Arc::new(detector), recognizer)
            .unwrap(),
    )
}

fn still(width: u32, height: u32) -> Arc<dyn FrameSource> {
    Arc::new(StillFrameSource::decoded(frame(width, height)))
}

#[tokio::test]
async fn test_detected_region_without_readable_text() {
    // One plate region; every reading is shorter than the height gate.
    let recognizer = Arc::new(FixedRecognizer::reading("MH12AB1234", 0.05));
    let pipeline = orchestrator(
        FixedDetector::new(vec![(0.1, 0.2, 0.5, 0.6, 0.9)]),
        recognizer.clone(),
    );

    let callbacks = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let fired = callbacks.clone();
    let task = pipeline.submit(still(200, 100), None, move |result| {
        fired.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });

    let result = rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(result.plate, None);
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.candidates_pooled, 0);

    // Sub-region scan: three passes, no full-frame fallback.
    assert_eq!(recognizer.calls(), 3);
    match result.scanned_region {
        Some(ScannedRegion::Detection { rect }) => {
            assert!((rect.x - 0.2).abs() < 1e-5);
            assert!((rect.y - 0.1).abs() < 1e-5);
            assert!((rect.width - 0.4).abs() < 1e-5);
            assert!((rect.height - 0.4).abs() < 1e-5);
        }
        other => panic!("unexpected scanned region {other:?}"),
    }
}

#[tokio::test]
async fn test_plate_read_and_corrected() {
    let recognizer = Arc::new(FixedRecognizer::reading("mh o1 ab 1234", 0.4));
    let pipeline = orchestrator(
        FixedDetector::new(vec![(0.1, 0.2, 0.5, 0.6, 0.9)]),
        recognizer.clone(),
    );

    let result = pipeline.run(still(200, 100), None).await;

    assert_eq!(result.plate.as_deref(), Some("MH01AB1234"));
    // Two accurate passes read the same line.
    assert_eq!(result.candidates_pooled, 2);
}

#[tokio::test]
async fn test_capture_failure_skips_recognition() {
    let recognizer = Arc::new(FixedRecognizer::reading("MH12AB1234", 0.4));
    let pipeline = orchestrator(FixedDetector::new(vec![(0.1, 0.1, 0.5, 0.5, 0.9)]), recognizer.clone());

    let result = pipeline.run(Arc::new(BrokenFrameSource), None).await;

    assert_eq!(result.plate, None);
    assert!(result.detections.is_empty());
    assert!(result.scanned_region.is_none());
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_capture_times_out() {
    let recognizer = Arc::new(FixedRecognizer::reading("MH12AB1234", 0.4));
    let pipeline = orchestrator(FixedDetector::empty(), recognizer.clone());

    let callbacks = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let fired = callbacks.clone();
    let started = tokio::time::Instant::now();
    pipeline.submit(Arc::new(StalledFrameSource::default()), None, move |result| {
        fired.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(result);
    });

    let result = rx.await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(result.plate, None);
    assert_eq!(recognizer.calls(), 0);
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_detection_scans_full_frame() {
    let recognizer = Arc::new(FixedRecognizer::silent());
    let pipeline = orchestrator(FixedDetector::empty(), recognizer.clone());

    let result = pipeline.run(still(64, 32), None).await;

    assert_eq!(result.scanned_region, Some(ScannedRegion::FullFrame));
    assert_eq!(result.plate, None);
    // Nothing pooled on a full frame: the high contrast pass runs too.
    assert_eq!(recognizer.calls(), 4);
    assert!(recognizer.regions().iter().all(Rect::is_full_frame));
}

#[tokio::test]
async fn test_detector_failure_degrades_to_full_frame() {
    let recognizer = Arc::new(FixedRecognizer::reading("KA01AB1234", 0.4));
    let pipeline = orchestrator(FailingDetector, recognizer.clone());

    let result = pipeline.run(still(64, 32), None).await;

    assert!(result.detections.is_empty());
    assert_eq!(result.scanned_region, Some(ScannedRegion::FullFrame));
    assert_eq!(result.plate.as_deref(), Some("KA01AB1234"));
}

#[tokio::test]
async fn test_requested_region_wins_over_detection() {
    let recognizer = Arc::new(FixedRecognizer::silent());
    let pipeline = orchestrator(
        FixedDetector::new(vec![(0.1, 0.2, 0.5, 0.6, 0.9)]),
        recognizer.clone(),
    );
    let requested = Rect::new(0.5, 0.5, 0.25, 0.25);

    let result = pipeline.run(still(200, 100), Some(requested)).await;

    assert_eq!(result.scanned_region, Some(ScannedRegion::Requested { rect: requested }));
    assert_eq!(result.detections.len(), 1);
    assert_eq!(recognizer.regions(), vec![requested; 3]);
}

#[tokio::test]
async fn test_cancelled_pipeline_reports_once() {
    let recognizer = Arc::new(FixedRecognizer::reading("MH12AB1234", 0.4));
    let pipeline = orchestrator(FixedDetector::empty(), recognizer.clone());
    pipeline.cancel();

    let callbacks = Arc::new(AtomicUsize::new(0));
    let fired = callbacks.clone();
    let task = pipeline.submit(still(64, 32), None, move |result| {
        assert_eq!(result.plate, None);
        fired.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(
        task.history(),
        vec![TaskState::Ready, TaskState::Cancelled, TaskState::Finished]
    );
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test]
async fn test_detect_with_callback_reports_pixels() {
    let config = PipelineConfig {
        plate_class_id: 0,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(
        PipelineOrchestrator::new(
            config,
            Arc::new(FixedDetector::new(vec![
                (0.1, 0.2, 0.5, 0.6, 0.9),
                (0.0, 0.0, 0.2, 0.2, 0.4),
                (0.3, 0.3, 0.6, 0.9, 0.6),
            ])),
            Arc::new(FixedRecognizer::silent()),
        )
        .unwrap(),
    );

    let (tx, rx) = tokio::sync::oneshot::channel();
    pipeline.detect_with_callback(Arc::new(frame(200, 100)), move |detections| {
        let _ = tx.send(detections);
    });
    let detections = rx.await.unwrap();

    assert_eq!(detections.len(), 2);
    let rect = detections[0].rect;
    assert!((rect.x - 40.0).abs() < 1e-4);
    assert!((rect.y - 10.0).abs() < 1e-4);
    assert!((rect.width - 80.0).abs() < 1e-4);
    assert!((rect.height - 40.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_recognize_with_callback() {
    let pipeline = orchestrator(
        FixedDetector::empty(),
        Arc::new(FixedRecognizer::reading("DL3CAB1234", 0.5)),
    );

    let (tx, rx) = tokio::sync::oneshot::channel();
    pipeline.recognize_with_callback(
        Arc::new(frame(200, 100)),
        Rect::new(0.1, 0.1, 0.5, 0.5),
        move |plate| {
            let _ = tx.send(plate);
        },
    );

    assert_eq!(rx.await.unwrap().as_deref(), Some("DL3CAB1234"));
}
