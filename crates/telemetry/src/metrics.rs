use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Pipeline Metrics ====
    pub static ref LPR_ACTIVE_PIPELINES: IntGauge = {
        let metric = IntGauge::new("lpr_active_pipelines", "Number of pipeline runs in flight")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_PIPELINE_RUNS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_pipeline_runs_total",
                "Total number of pipeline runs by outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Stage Metrics ====
    pub static ref LPR_STAGE_RUNS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_stage_runs_total",
                "Total number of finished pipeline stages",
            ),
            &["stage", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_STAGE_DURATION: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "lpr_stage_duration_seconds",
                "Time from stage start to stage finish",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_CAPTURE_TIMEOUTS: IntCounter = {
        let metric = IntCounter::new(
            "lpr_capture_timeouts_total",
            "Capture stages finished by the watchdog",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Recognition Metrics ====
    pub static ref LPR_DETECTIONS: IntCounter = {
        let metric = IntCounter::new(
            "lpr_detections_total",
            "Plate regions decoded from detector output",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_OCR_PASSES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_ocr_passes_total",
                "OCR passes by image variant and recognition level",
            ),
            &["variant", "level", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_PLATES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_plates_total",
                "Recognition results by selection tier",
            ),
            &["tier"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_metrics_accessible() {
        LPR_STAGE_RUNS
            .with_label_values(&["capture", "completed"])
            .inc();
        assert!(
            LPR_STAGE_RUNS
                .with_label_values(&["capture", "completed"])
                .get()
                >= 1
        );
    }

    #[test]
    fn test_recognition_metrics_accessible() {
        LPR_OCR_PASSES
            .with_label_values(&["original", "fast", "ok"])
            .inc();
        LPR_PLATES.with_label_values(&["region"]).inc();
        assert!(LPR_PLATES.with_label_values(&["region"]).get() >= 1);
    }

    #[test]
    fn test_encode_metrics_succeeds() {
        LPR_CAPTURE_TIMEOUTS.inc();
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("lpr_capture_timeouts_total"));
    }
}
