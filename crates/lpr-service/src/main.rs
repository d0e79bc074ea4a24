use anyhow::Result;
use lpr_service::backend::{OnnxPlateDetector, OnnxSettings, OnnxTextRecognizer};
use lpr_service::{api, LprServiceConfig, LprServiceState, PipelineOrchestrator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

fn load_pipeline(config: &LprServiceConfig) -> Result<PipelineOrchestrator> {
    let settings = OnnxSettings::from_config(config);
    let detector = OnnxPlateDetector::load(&config.detection_model_path, &settings)?;
    let recognizer = OnnxTextRecognizer::load(&config.ocr_model_path, &settings)?;
    info!(
        detector_provider = detector.provider(),
        recognizer_provider = recognizer.provider(),
        "models loaded"
    );
    PipelineOrchestrator::new(config.pipeline.clone(), Arc::new(detector), Arc::new(recognizer))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("lpr-service");

    info!("Starting LPR Service...");

    let config = LprServiceConfig::from_env()?;
    info!(
        "LPR Service configuration: bind={}, node_id={}, provider={}",
        config.bind_addr, config.node_id, config.execution_provider
    );

    let state = match load_pipeline(&config) {
        Ok(orchestrator) => LprServiceState::new(config.node_id.clone(), Arc::new(orchestrator)),
        Err(e) => {
            error!("Failed to load recognition models: {:#}", e);
            LprServiceState::unavailable(config.node_id.clone(), format!("{e:#}"))
        }
    };

    let app = api::router(state.clone());

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("LPR Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: LprServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown();
}
