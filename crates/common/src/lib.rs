pub mod frame_extractor;
pub mod plates;
pub mod validation;

pub use plates::{
    DetectRequest, DetectResponse, Detection, PipelineResult, RecognizeRequest, Rect, ScannedRegion,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
