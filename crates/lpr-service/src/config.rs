use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Two-letter region codes that prefix plates in the supported format.
///
/// Handed to the accurate OCR pass as a custom vocabulary.
pub const DEFAULT_REGION_CODES: &[&str] = &[
    "AN", "AP", "AR", "AS", "BR", "CG", "CH", "DD", "DL", "GA", "GJ", "HP", "HR", "JH", "JK",
    "KA", "KL", "LA", "LD", "MH", "ML", "MN", "MP", "MZ", "NL", "OD", "PB", "PY", "RJ", "SK",
    "TN", "TR", "TS", "UK", "UP", "WB",
];

/// How the detection carried forward to recognition is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProminencePolicy {
    /// First decoded detection
    #[default]
    First,
    /// Detection with the highest score (first wins on ties)
    HighestScore,
}

/// Tunables for the recognition pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum detector score for a box to count as a plate (0.0 to 1.0)
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Detector class index for "license plate"
    #[serde(default)]
    pub plate_class_id: i32,

    /// Detector entries read from the tensor bundle; values above 10 are clamped
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Minimum observed glyph height as a fraction of the scanned region height
    #[serde(default = "default_min_text_height")]
    pub min_text_height: f32,

    /// Ranked strings taken from each text observation
    #[serde(default = "default_max_candidates")]
    pub max_candidates_per_observation: usize,

    /// Capture watchdog in milliseconds
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Region-code vocabulary for the accurate OCR passes
    #[serde(default = "default_region_codes")]
    pub region_codes: Vec<String>,

    /// Which detection is carried forward when several are decoded
    #[serde(default)]
    pub prominence: ProminencePolicy,
}

fn default_score_threshold() -> f32 {
    0.5
}

fn default_max_detections() -> usize {
    10
}

fn default_min_text_height() -> f32 {
    0.15
}

fn default_max_candidates() -> usize {
    10
}

fn default_capture_timeout_ms() -> u64 {
    10_000
}

fn default_region_codes() -> Vec<String> {
    DEFAULT_REGION_CODES.iter().map(|code| code.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            plate_class_id: 0,
            max_detections: default_max_detections(),
            min_text_height: default_min_text_height(),
            max_candidates_per_observation: default_max_candidates(),
            capture_timeout_ms: default_capture_timeout_ms(),
            region_codes: default_region_codes(),
            prominence: ProminencePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid pipeline config {}", path.display()))
    }
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct LprServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Node ID for this recognizer instance
    pub node_id: String,

    /// Plate detector ONNX model
    pub detection_model_path: PathBuf,

    /// Text line recognizer ONNX model
    pub ocr_model_path: PathBuf,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    pub execution_provider: String,

    /// GPU device ID
    pub device_id: i32,

    /// Pipeline tunables
    pub pipeline: PipelineConfig,
}

impl LprServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("LPR_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8086".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "lpr-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let detection_model_path = env::var("LPR_DETECTION_MODEL")
            .unwrap_or_else(|_| "models/plate_detector.onnx".to_string())
            .into();
        let ocr_model_path = env::var("LPR_OCR_MODEL")
            .unwrap_or_else(|_| "models/plate_ocr.onnx".to_string())
            .into();

        let execution_provider =
            env::var("LPR_EXECUTION_PROVIDER").unwrap_or_else(|_| "CPU".to_string());
        let device_id = env::var("LPR_DEVICE_ID")
            .ok()
            .map(|raw| raw.parse::<i32>().context("Invalid LPR_DEVICE_ID"))
            .transpose()?
            .unwrap_or(0);

        let pipeline = match env::var("LPR_PIPELINE_CONFIG") {
            Ok(path) => PipelineConfig::from_file(std::path::Path::new(&path))?,
            Err(_) => PipelineConfig::default(),
        };

        Ok(Self {
            bind_addr,
            node_id,
            detection_model_path,
            ocr_model_path,
            execution_provider,
            device_id,
            pipeline,
        })
    }
}
