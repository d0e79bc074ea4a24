pub mod routes;

use crate::state::LprServiceState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: LprServiceState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Recognition endpoints
        .route("/v1/detect", post(routes::detect))
        .route("/v1/recognize", post(routes::recognize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
