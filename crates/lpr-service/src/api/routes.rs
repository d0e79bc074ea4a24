use crate::error::ApiError;
use crate::state::LprServiceState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::{DetectRequest, DetectResponse, PipelineResult, RecognizeRequest};
use serde_json::json;

/// Detect plate regions in an uploaded image
pub async fn detect(
    State(state): State<LprServiceState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let detections = state.detect(&request.image).await?;
    tracing::debug!(count = detections.len(), "detect request served");
    Ok(Json(DetectResponse { detections }))
}

/// Run the full capture, detect, recognize pipeline
pub async fn recognize(
    State(state): State<LprServiceState>,
    Json(request): Json<RecognizeRequest>,
) -> Result<Json<PipelineResult>, ApiError> {
    let result = state.recognize(request).await?;
    Ok(Json(result))
}

/// Health check endpoint
pub async fn healthz(State(state): State<LprServiceState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lpr-service",
            "node_id": state.node_id(),
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<LprServiceState>) -> impl IntoResponse {
    match state.unready_reason() {
        None => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Some(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "reason": reason,
            })),
        ),
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
