//! Export of inline videos from serverless-style responses
//!
//! Responses look like `{"output": {"video": "<base64>"}}`.

use itk_common::{Error, Result};
use serde_json::Value;
use std::path::Path;

use crate::services::media_resolver::decode_base64_payload;

/// Decode `output.video` from a response document
pub fn extract_video(response: &Value) -> Result<Vec<u8>> {
    let encoded = response
        .get("output")
        .and_then(|output| output.get("video"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("JSON does not contain 'output.video'".to_string()))?;

    decode_base64_payload(encoded)
        .map_err(|e| Error::InvalidInput(format!("Failed to base64 decode output.video: {}", e)))
}

/// Write the decoded video to `output_path`, returning the byte count
pub fn save_video_from_json(response: &Value, output_path: &Path) -> Result<usize> {
    let bytes = extract_video(response)?;
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, &bytes)?;
    Ok(bytes.len())
}
