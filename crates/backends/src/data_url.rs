//! Inline images as base64 `data:` URLs for conditioning requests.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use mvforge_core::error::JobError;
use mvforge_core::media::mime_for_path;

pub fn encode(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Read a local file and encode it, guessing the MIME type from its
/// extension. An unreadable file fails the request before it is sent.
pub async fn encode_file(path: &Path) -> Result<String, JobError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        JobError::Request(format!("Failed to read {}: {e}", path.display()))
    })?;
    Ok(encode(&bytes, mime_for_path(path)))
}
