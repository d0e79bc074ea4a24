use crate::backend::{FfmpegFrameSource, FrameSource, StillFrameSource};
use crate::error::ApiError;
use crate::orchestrator::PipelineOrchestrator;
use common::validation::{decode_image_payload, validate_frame_dimensions, validate_region, validate_uri};
use common::{Detection, PipelineResult, RecognizeRequest};
use image::DynamicImage;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct LprServiceState {
    inner: Arc<LprServiceStateInner>,
}

struct LprServiceStateInner {
    node_id: String,
    pipeline: Result<Arc<PipelineOrchestrator>, String>,
}

impl LprServiceState {
    pub fn new(node_id: String, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            inner: Arc::new(LprServiceStateInner {
                node_id,
                pipeline: Ok(orchestrator),
            }),
        }
    }

    /// State for a node whose models could not be loaded; it stays up but
    /// reports not ready and rejects recognition requests.
    pub fn unavailable(node_id: String, reason: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LprServiceStateInner {
                node_id,
                pipeline: Err(reason.into()),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// `None` when ready, otherwise why not
    pub fn unready_reason(&self) -> Option<&str> {
        match &self.inner.pipeline {
            Ok(orchestrator) if orchestrator.is_cancelled() => Some("shutting down"),
            Ok(_) => None,
            Err(reason) => Some(reason.as_str()),
        }
    }

    fn pipeline(&self) -> Result<&Arc<PipelineOrchestrator>, ApiError> {
        match &self.inner.pipeline {
            Ok(orchestrator) if orchestrator.is_cancelled() => {
                Err(ApiError::unavailable("service is shutting down"))
            }
            Ok(orchestrator) => Ok(orchestrator),
            Err(reason) => Err(ApiError::unavailable(reason.clone())),
        }
    }

    async fn decode_image(payload: &str) -> Result<DynamicImage, ApiError> {
        let bytes = decode_image_payload(payload, "image")
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?
            .map_err(|e| ApiError::bad_request(format!("image could not be decoded: {e}")))?;
        validate_frame_dimensions(image.width(), image.height())
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(image)
    }

    pub async fn detect(&self, payload: &str) -> Result<Vec<Detection>, ApiError> {
        let pipeline = self.pipeline()?.clone();
        let image = Self::decode_image(payload).await?;
        Ok(pipeline.detect(Arc::new(image)).await)
    }

    pub async fn recognize(&self, request: RecognizeRequest) -> Result<PipelineResult, ApiError> {
        let pipeline = self.pipeline()?.clone();

        if let Some(region) = &request.region {
            validate_region(region, "region").map_err(|e| ApiError::bad_request(e.to_string()))?;
        }

        let source: Arc<dyn FrameSource> = match (request.image, request.source_uri) {
            (Some(payload), None) => {
                let bytes = decode_image_payload(&payload, "image")
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                Arc::new(StillFrameSource::encoded(bytes))
            }
            (None, Some(uri)) => {
                validate_uri(&uri, "source_uri").map_err(|e| ApiError::bad_request(e.to_string()))?;
                Arc::new(FfmpegFrameSource::new(uri))
            }
            _ => {
                return Err(ApiError::bad_request(
                    "exactly one of image or source_uri is required",
                ))
            }
        };

        Ok(pipeline.run(source, request.region).await)
    }

    pub fn shutdown(&self) {
        info!(node_id = %self.inner.node_id, "shutting down LPR service");
        match &self.inner.pipeline {
            Ok(orchestrator) => orchestrator.cancel(),
            Err(reason) => warn!(reason = %reason, "pipeline was never available"),
        }
    }
}
