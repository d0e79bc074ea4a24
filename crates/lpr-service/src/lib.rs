pub mod api;
pub mod backend;
pub mod config;
pub mod corrector;
pub mod decoder;
pub mod enhance;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod selector;
pub mod stages;
pub mod state;
pub mod task;

pub use config::{LprServiceConfig, PipelineConfig, ProminencePolicy};
pub use error::{ApiError, PipelineError};
pub use orchestrator::PipelineOrchestrator;
pub use state::LprServiceState;
pub use task::{CancellableTask, TaskContext, TaskOutcome, TaskState, TaskWork};
