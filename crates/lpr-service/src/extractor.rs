//! Multi-pass text candidate extraction
//!
//! One recognizer is driven over a fixed sequence of image variants and
//! recognition levels:
//!
//! 1. original image, fast
//! 2. original image, accurate, primed with the region-code vocabulary
//! 3. contrast + sharpen, accurate
//! 4. high contrast grayscale, accurate; full-frame scans only, and only when
//!    passes 1-3 admitted nothing
//!
//! Passes run one after another on the calling thread. A failing pass is
//! logged and skipped.

use crate::backend::{RecognitionLevel, RecognitionOptions, TextRecognizer};
use crate::config::PipelineConfig;
use crate::enhance::ImageVariant;
use crate::error::PipelineError;
use common::Rect;
use image::DynamicImage;
use telemetry::metrics::LPR_OCR_PASSES;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A raw OCR reading that passed the glyph height gate
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    pub raw: String,
    /// Glyph height as a fraction of the scanned region
    pub source_height: f32,
    pub variant: ImageVariant,
    pub level: RecognitionLevel,
}

#[derive(Debug, Clone, Copy)]
struct Pass {
    variant: ImageVariant,
    level: RecognitionLevel,
    primed: bool,
}

const PASSES: [Pass; 3] = [
    Pass {
        variant: ImageVariant::Original,
        level: RecognitionLevel::Fast,
        primed: false,
    },
    Pass {
        variant: ImageVariant::Original,
        level: RecognitionLevel::Accurate,
        primed: true,
    },
    Pass {
        variant: ImageVariant::Enhanced,
        level: RecognitionLevel::Accurate,
        primed: false,
    },
];

const FULL_FRAME_PASS: Pass = Pass {
    variant: ImageVariant::HighContrast,
    level: RecognitionLevel::Accurate,
    primed: false,
};

#[derive(Debug, Clone)]
pub struct TextCandidateExtractor {
    min_text_height: f32,
    max_candidates: usize,
    region_codes: Vec<String>,
}

impl TextCandidateExtractor {
    pub fn new(min_text_height: f32, max_candidates: usize, region_codes: Vec<String>) -> Self {
        Self {
            min_text_height,
            max_candidates,
            region_codes,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.min_text_height,
            config.max_candidates_per_observation,
            config.region_codes.clone(),
        )
    }

    fn options(&self, pass: &Pass) -> RecognitionOptions {
        match pass.level {
            RecognitionLevel::Fast => RecognitionOptions::fast(),
            RecognitionLevel::Accurate if pass.primed => {
                RecognitionOptions::accurate(self.region_codes.clone())
            }
            RecognitionLevel::Accurate => RecognitionOptions::accurate(Vec::new()),
        }
    }

    /// Run every applicable pass over `roi` of `image` and pool the admitted
    /// readings in pass order. Duplicates are kept.
    ///
    /// Returns `Err(PipelineError::Cancelled)` if `cancel` is raised before
    /// a pass starts.
    pub fn extract(
        &self,
        recognizer: &dyn TextRecognizer,
        image: &DynamicImage,
        roi: &Rect,
        cancel: &CancellationToken,
    ) -> Result<Vec<TextCandidate>, PipelineError> {
        if !(roi.width > 0.0 && roi.height > 0.0) {
            return Err(PipelineError::InvalidInput(format!(
                "empty region of interest {}x{}",
                roi.width, roi.height
            )));
        }

        let mut pool = Vec::new();

        for pass in PASSES.iter() {
            self.run_pass(recognizer, image, roi, pass, cancel, &mut pool)?;
        }

        if roi.is_full_frame() && pool.is_empty() {
            self.run_pass(recognizer, image, roi, &FULL_FRAME_PASS, cancel, &mut pool)?;
        }

        debug!(pooled = pool.len(), full_frame = roi.is_full_frame(), "text extraction done");
        Ok(pool)
    }

    fn run_pass(
        &self,
        recognizer: &dyn TextRecognizer,
        image: &DynamicImage,
        roi: &Rect,
        pass: &Pass,
        cancel: &CancellationToken,
        pool: &mut Vec<TextCandidate>,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let variant = pass.variant.as_str();
        let level = pass.level.as_str();
        let source = pass.variant.apply(image);

        let observations = match recognizer.recognize(&source, roi, &self.options(pass)) {
            Ok(observations) => observations,
            Err(e) => {
                warn!(variant, level, error = %e, "OCR pass failed");
                LPR_OCR_PASSES
                    .with_label_values(&[variant, level, "error"])
                    .inc();
                return Ok(());
            }
        };
        LPR_OCR_PASSES.with_label_values(&[variant, level, "ok"]).inc();

        let before = pool.len();
        for observation in observations {
            let height = observation.bounding_box.height;
            if height <= self.min_text_height {
                continue;
            }
            pool.extend(
                observation
                    .candidates
                    .into_iter()
                    .take(self.max_candidates)
                    .map(|raw| TextCandidate {
                        raw,
                        source_height: height,
                        variant: pass.variant,
                        level: pass.level,
                    }),
            );
        }

        debug!(variant, level, admitted = pool.len() - before, "OCR pass done");
        Ok(())
    }
}
