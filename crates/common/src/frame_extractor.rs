//! Single-frame grabbing from video sources
//!
//! Recognition runs on still frames. For stream sources the frame is pulled with
//! FFmpeg and returned as encoded PNG bytes so no lossy step sits in front of OCR.

use crate::validation::validate_uri;
use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::{debug, error, warn};

/// Options for grabbing a frame from a video source
#[derive(Debug, Clone)]
pub struct FrameGrabOptions {
    /// Target frame width (0 = keep source width)
    pub width: u32,
    /// Seek offset into the source in milliseconds (0 = first frame)
    pub seek_ms: u64,
    /// Prefer TCP transport for RTSP sources
    pub rtsp_tcp: bool,
}

impl Default for FrameGrabOptions {
    fn default() -> Self {
        Self {
            width: 0,
            seek_ms: 0,
            rtsp_tcp: true,
        }
    }
}

/// Build the FFmpeg argument list for a single PNG frame on stdout
pub fn ffmpeg_args(source_uri: &str, options: &FrameGrabOptions) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];

    if options.rtsp_tcp && source_uri.starts_with("rtsp://") {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }

    if options.seek_ms > 0 {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", options.seek_ms as f64 / 1000.0));
    }

    args.push("-i".to_string());
    args.push(source_uri.to_string());
    args.push("-frames:v".to_string());
    args.push("1".to_string());

    if options.width > 0 {
        args.push("-vf".to_string());
        args.push(format!("scale={}:-2", options.width));
    }

    args.push("-f".to_string());
    args.push("image2pipe".to_string());
    args.push("-vcodec".to_string());
    args.push("png".to_string());
    args.push("pipe:1".to_string());
    args
}

/// Grab one frame from a video source as PNG bytes
///
/// This call blocks until FFmpeg exits; run it on a blocking worker.
pub fn grab_frame_png(source_uri: &str, options: &FrameGrabOptions) -> Result<Vec<u8>> {
    validate_uri(source_uri, "source_uri")?;

    let args = ffmpeg_args(source_uri, options);
    debug!(source = %source_uri, args = ?args, "spawning ffmpeg for frame grab");

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .context("failed to execute ffmpeg")?;

    if !output.status.success() {
        error!(
            source = %source_uri,
            status = ?output.status,
            "ffmpeg frame grab failed"
        );
        anyhow::bail!("ffmpeg exited with error: {:?}", output.status);
    }

    if output.stdout.is_empty() {
        warn!(source = %source_uri, "ffmpeg returned empty frame data");
        anyhow::bail!("ffmpeg returned no frame data");
    }

    debug!(
        source = %source_uri,
        size_bytes = output.stdout.len(),
        "frame grabbed"
    );

    Ok(output.stdout)
}
