/// ONNX Runtime adapters for plate detection and text line recognition
///
/// Two models are used:
/// 1. An SSD-style plate detector exporting `boxes`, `scores`, `classes`
///    and `count` tensors, handed over raw to the detection decoder
/// 2. A CRNN line recognizer with a CTC head, decoded greedily in fast mode
///    and with a prefix beam search in accurate mode
use super::{
    InferenceEngine, RecognitionLevel, RecognitionOptions, TextObservation, TextRecognizer,
};
use crate::config::LprServiceConfig;
use crate::decoder::{RawTensor, TensorBundle};
use anyhow::{Context, Result};
use common::Rect;
use image::{DynamicImage, GrayImage};
use imageproc::contrast::otsu_level;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session},
    value::Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Characters emitted by the line recognizer. CTC blank sits at index 0, so
/// model index `i` maps to `CHAR_VOCAB[i - 1]`.
pub const CHAR_VOCAB: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-";

const DETECTION_INPUT_SIZE: u32 = 320;
const OCR_INPUT_WIDTH: u32 = 200;
const OCR_INPUT_HEIGHT: u32 = 64;
const BEAM_WIDTH: usize = 16;
const BEAM_TOP_K: usize = 10;
const BEAM_PRUNE: f64 = 1e-4;
/// Share of a row's pixels that must be ink for the row to count as glyph
const INK_ROW_FRACTION: f32 = 0.02;

/// Runtime settings shared by both sessions
#[derive(Debug, Clone)]
pub struct OnnxSettings {
    /// Execution provider preference (CPU, CUDA, TensorRT)
    pub execution_provider: String,
    pub device_id: i32,
    pub intra_threads: usize,
    pub inter_threads: usize,
}

impl Default for OnnxSettings {
    fn default() -> Self {
        Self {
            execution_provider: "CPU".to_string(),
            device_id: 0,
            intra_threads: 4,
            inter_threads: 1,
        }
    }
}

impl OnnxSettings {
    pub fn from_config(config: &LprServiceConfig) -> Self {
        Self {
            execution_provider: config.execution_provider.clone(),
            device_id: config.device_id,
            ..Self::default()
        }
    }
}

fn session_builder(settings: &OnnxSettings) -> Result<SessionBuilder> {
    Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(settings.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(settings.inter_threads)
        .context("Failed to set inter threads")
}

/// Create a session, falling back TensorRT -> CUDA -> CPU
///
/// Returns the session together with the provider that was configured.
pub fn create_session(model_path: &Path, settings: &OnnxSettings) -> Result<(Session, &'static str)> {
    let preference = settings.execution_provider.to_uppercase();

    if preference == "TENSORRT" {
        info!(model = %model_path.display(), "attempting TensorRT");
        let result = session_builder(settings)?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .context("Failed to set execution providers")?
            .commit_from_file(model_path);
        match result {
            Ok(session) => return Ok((session, "TensorRT")),
            Err(e) => warn!(error = %e, "TensorRT failed, trying CUDA"),
        }
    }

    if preference == "TENSORRT" || preference == "CUDA" {
        info!(model = %model_path.display(), "attempting CUDA");
        let result = session_builder(settings)?
            .with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .context("Failed to set execution providers")?
            .commit_from_file(model_path);
        match result {
            Ok(session) => return Ok((session, "CUDA")),
            Err(e) => warn!(error = %e, "CUDA failed, using CPU"),
        }
    }

    info!(model = %model_path.display(), "using CPU");
    let session = session_builder(settings)?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    Ok((session, "CPU"))
}

/// SSD-style plate detector
pub struct OnnxPlateDetector {
    session: Mutex<Session>,
    provider: &'static str,
    input_size: u32,
}

impl OnnxPlateDetector {
    pub fn load(model_path: &Path, settings: &OnnxSettings) -> Result<Self> {
        let (session, provider) = create_session(model_path, settings)?;
        info!(model = %model_path.display(), provider, "plate detector loaded");
        Ok(Self {
            session: Mutex::new(session),
            provider,
            input_size: DETECTION_INPUT_SIZE,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// NHWC, RGB scaled to [0, 1]
    fn preprocess(&self, img: &DynamicImage) -> Array<f32, IxDyn> {
        let size = self.input_size;
        let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb_img = resized.to_rgb8();

        let mut input = Array::zeros(IxDyn(&[1, size as usize, size as usize, 3]));
        for (x, y, pixel) in rgb_img.enumerate_pixels() {
            for c in 0..3 {
                input[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
            }
        }
        input
    }
}

impl InferenceEngine for OnnxPlateDetector {
    fn infer(&self, image: &DynamicImage) -> Result<TensorBundle> {
        let input_tensor = Value::from_array(self.preprocess(image))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock detection session: {}", e))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        // Copies the first output found under any of `names`
        let extract = |names: &[&str]| -> Result<RawTensor> {
            let value = names
                .iter()
                .find_map(|name| outputs.get(*name))
                .with_context(|| format!("No output tensor found (tried: {})", names.join(", ")))?;
            let (_, data) = value.try_extract_tensor::<f32>()?;
            Ok(RawTensor::from_f32s(data))
        };

        Ok(TensorBundle {
            boxes: extract(&["detection_boxes", "boxes"])?,
            scores: extract(&["detection_scores", "scores"])?,
            classes: extract(&["detection_classes", "classes"])?,
            count: extract(&["num_detections", "count"])?,
        })
    }
}

/// CRNN line recognizer with a CTC head
pub struct OnnxTextRecognizer {
    session: Mutex<Session>,
    provider: &'static str,
}

impl OnnxTextRecognizer {
    pub fn load(model_path: &Path, settings: &OnnxSettings) -> Result<Self> {
        let (session, provider) = create_session(model_path, settings)?;
        info!(model = %model_path.display(), provider, "text recognizer loaded");
        Ok(Self {
            session: Mutex::new(session),
            provider,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Per-timestep class probabilities for one grayscale line crop
    fn infer_probabilities(&self, crop: &DynamicImage) -> Result<Vec<Vec<f32>>> {
        let resized = crop.resize_exact(
            OCR_INPUT_WIDTH,
            OCR_INPUT_HEIGHT,
            image::imageops::FilterType::Triangle,
        );
        let gray = resized.to_luma8();

        let mut input = Array::zeros(IxDyn(&[
            1,
            1,
            OCR_INPUT_HEIGHT as usize,
            OCR_INPUT_WIDTH as usize,
        ]));
        for (x, y, pixel) in gray.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        }
        let input_tensor = Value::from_array(input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock OCR session: {}", e))?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        // Expected shape: [batch, sequence_length, vocab_size]
        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("logits"))
            .context("No OCR output tensor found (tried: output, output0, logits)")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;
        first_batch_rows(&output)
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(
        &self,
        image: &DynamicImage,
        roi: &Rect,
        options: &RecognitionOptions,
    ) -> Result<Vec<TextObservation>> {
        let (x, y, width, height) = roi.to_pixels(image.width(), image.height());
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let crop = image.crop_imm(x, y, width, height);

        let Some(bounding_box) = measure_ink(&crop.to_luma8()) else {
            debug!("no ink found in region");
            return Ok(Vec::new());
        };

        let probabilities = self.infer_probabilities(&crop)?;
        let candidates = match options.level {
            RecognitionLevel::Fast => {
                let text = greedy_decode(&probabilities);
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                }
            }
            RecognitionLevel::Accurate => {
                let mut ranked = beam_decode(&probabilities, BEAM_WIDTH, BEAM_TOP_K);
                prefer_custom_words(&mut ranked, &options.custom_words);
                ranked
            }
        };

        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TextObservation {
            candidates,
            bounding_box,
        }])
    }
}

/// Per-step class probabilities of the first batch entry of a
/// `[batch, steps, classes]` output
fn first_batch_rows(output: &Array<f32, IxDyn>) -> Result<Vec<Vec<f32>>> {
    let shape = output.shape();
    if shape.len() != 3 {
        anyhow::bail!("unexpected OCR output rank {:?}", shape);
    }
    if shape[0] == 0 {
        anyhow::bail!("OCR output has an empty batch {:?}", shape);
    }

    let (steps, classes) = (shape[1], shape[2]);
    Ok((0..steps)
        .map(|t| {
            let row: Vec<f32> = (0..classes).map(|c| output[[0, t, c]]).collect();
            to_probabilities(row)
        })
        .collect())
}

/// Softmax a row unless it already is a probability distribution
fn to_probabilities(row: Vec<f32>) -> Vec<f32> {
    let sum: f32 = row.iter().sum();
    if row.iter().all(|v| *v >= 0.0) && (sum - 1.0).abs() < 1e-3 {
        return row;
    }
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

fn index_to_char(index: usize) -> Option<char> {
    index.checked_sub(1).and_then(|i| CHAR_VOCAB.chars().nth(i))
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_p), (i, &p)| {
            if p > best_p {
                (i, p)
            } else {
                (best, best_p)
            }
        })
        .0
}

/// CTC greedy decoding: best class per step, collapse repeats, drop blanks
pub fn greedy_decode(probabilities: &[Vec<f32>]) -> String {
    let mut result = String::new();
    let mut prev = 0;
    for row in probabilities {
        let idx = argmax(row);
        if idx > 0 && idx != prev {
            if let Some(ch) = index_to_char(idx) {
                result.push(ch);
            }
        }
        prev = idx;
    }
    result
}

/// CTC prefix beam search returning up to `top_k` distinct strings, best first
pub fn beam_decode(probabilities: &[Vec<f32>], beam_width: usize, top_k: usize) -> Vec<String> {
    // prefix -> (ends in blank, ends in non-blank)
    let mut beams: Vec<(Vec<usize>, f64, f64)> = vec![(Vec::new(), 1.0, 0.0)];

    for row in probabilities {
        let mut next: HashMap<Vec<usize>, (f64, f64)> = HashMap::new();

        for (prefix, p_blank, p_non_blank) in &beams {
            let total = p_blank + p_non_blank;
            let last = prefix.last().copied();

            if let Some(&blank) = row.first() {
                next.entry(prefix.clone()).or_default().0 += total * blank as f64;
            }

            for (c, &p) in row.iter().enumerate().skip(1) {
                let p = p as f64;
                if p < BEAM_PRUNE {
                    continue;
                }
                let mut extended = prefix.clone();
                extended.push(c);
                if last == Some(c) {
                    // A repeat only extends after a blank; otherwise it collapses.
                    next.entry(prefix.clone()).or_default().1 += p_non_blank * p;
                    next.entry(extended).or_default().1 += p_blank * p;
                } else {
                    next.entry(extended).or_default().1 += total * p;
                }
            }
        }

        let mut ranked: Vec<(Vec<usize>, f64, f64)> =
            next.into_iter().map(|(k, (b, nb))| (k, b, nb)).collect();
        ranked.sort_by(|a, b| {
            (b.1 + b.2)
                .partial_cmp(&(a.1 + a.2))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(beam_width);
        beams = ranked;
    }

    let mut strings: Vec<String> = Vec::new();
    for (prefix, _, _) in beams {
        let text: String = prefix.into_iter().filter_map(index_to_char).collect();
        if !text.is_empty() && !strings.contains(&text) {
            strings.push(text);
        }
        if strings.len() == top_k {
            break;
        }
    }
    strings
}

/// Move strings that start with a known region code to the front
pub fn prefer_custom_words(candidates: &mut [String], custom_words: &[String]) {
    if custom_words.is_empty() {
        return;
    }
    candidates.sort_by_key(|c| !custom_words.iter().any(|w| c.starts_with(w.as_str())));
}

/// Glyph box of the minority (ink) class after Otsu binarization,
/// normalized to the crop
pub fn measure_ink(gray: &GrayImage) -> Option<Rect> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let level = otsu_level(gray);
    let dark = gray.pixels().filter(|p| p[0] <= level).count();
    let ink_is_dark = dark * 2 <= (width * height) as usize;
    let is_ink = |value: u8| (value <= level) == ink_is_dark;

    let min_row_ink = ((width as f32 * INK_ROW_FRACTION).ceil() as usize).max(1);
    let ink_rows: Vec<u32> = (0..height)
        .filter(|&y| (0..width).filter(|&x| is_ink(gray.get_pixel(x, y)[0])).count() >= min_row_ink)
        .collect();
    let (&top, &bottom) = (ink_rows.first()?, ink_rows.last()?);

    let ink_cols: Vec<u32> = (0..width)
        .filter(|&x| (top..=bottom).any(|y| is_ink(gray.get_pixel(x, y)[0])))
        .collect();
    let (&left, &right) = (ink_cols.first()?, ink_cols.last()?);

    Some(Rect::new(
        left as f32 / width as f32,
        top as f32 / height as f32,
        (right - left + 1) as f32 / width as f32,
        (bottom - top + 1) as f32 / height as f32,
    ))
}
