//! Input validation for recognition requests
//!
//! Everything arriving over the wire is checked here before it reaches the
//! pipeline, so that malformed input is rejected with an error instead of
//! panicking deep inside image or tensor code.

use crate::plates::Rect;
use anyhow::{anyhow, Result};
use base64::Engine;

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for URIs (RTSP, HTTP, file paths)
pub const MAX_URI_LENGTH: usize = 4096;

/// Maximum size of a base64 image payload (16 MiB encoded)
pub const MAX_IMAGE_PAYLOAD_LENGTH: usize = 16 * 1024 * 1024;

/// Maximum frame edge accepted by the pipeline
pub const MAX_FRAME_DIMENSION: u32 = 8192;

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate a frame source URI before it is handed to ffmpeg
pub fn validate_uri(uri: &str, field_name: &str) -> Result<()> {
    validate_non_empty(uri, field_name)?;
    validate_length(uri, MAX_URI_LENGTH, field_name)?;

    // Prevent shell metacharacters (command injection)
    let dangerous_chars = ['`', '$', ';', '|', '&', '\n', '\r'];
    if uri.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!(
            "{} contains dangerous shell metacharacters",
            field_name
        ));
    }

    Ok(())
}

// ============================================================================
// Image Payloads
// ============================================================================

/// Decode a base64 image payload, enforcing the size limit first
pub fn decode_image_payload(payload: &str, field_name: &str) -> Result<Vec<u8>> {
    validate_non_empty(payload, field_name)?;
    validate_length(payload, MAX_IMAGE_PAYLOAD_LENGTH, field_name)?;

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| anyhow!("{} is not valid base64: {}", field_name, e))
}

/// Validate frame dimensions reported by a capture source
pub fn validate_frame_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame has empty dimensions {}x{}", width, height));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(anyhow!(
            "frame dimensions {}x{} exceed maximum of {}",
            width,
            height,
            MAX_FRAME_DIMENSION
        ));
    }
    Ok(())
}

// ============================================================================
// Geometry
// ============================================================================

/// Validate a normalized region of interest
///
/// The region must be finite, have a positive size and lie inside the unit square.
pub fn validate_region(region: &Rect, field_name: &str) -> Result<()> {
    let values = [region.x, region.y, region.width, region.height];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("{} contains non-finite coordinates", field_name));
    }
    if region.width <= 0.0 || region.height <= 0.0 {
        return Err(anyhow!("{} must have a positive width and height", field_name));
    }
    validate_range(region.x, 0.0, 1.0, field_name)?;
    validate_range(region.y, 0.0, 1.0, field_name)?;
    if region.x + region.width > 1.0 + f32::EPSILON || region.y + region.height > 1.0 + f32::EPSILON
    {
        return Err(anyhow!("{} extends beyond the frame", field_name));
    }
    Ok(())
}

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
