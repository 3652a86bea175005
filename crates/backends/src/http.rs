//! HTTP plumbing shared by the vendor backends.
//!
//! Maps transport failures onto [`JobError::Request`] and download or
//! write failures onto [`JobError::ResultUnavailable`].

use std::path::Path;

use mvforge_core::error::JobError;

pub(crate) fn transport(e: reqwest::Error) -> JobError {
    JobError::Request(e.to_string())
}

fn status_error(status: reqwest::StatusCode, body: &str) -> JobError {
    JobError::Request(format!("HTTP {}: {body}", status.as_u16()))
}

async fn body_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string())
}

/// Return the response on 2xx, otherwise a [`JobError::Request`] carrying
/// the status and body.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, JobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(status_error(status, &body_text(response).await))
}

/// Send a request and decode a JSON body. Every failure is a request
/// error: nothing has been produced yet.
pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, JobError> {
    send_json_explained(request, |_| None).await
}

/// Like [`send_json`], but a non-2xx body is first offered to `explain`,
/// which turns an error the backend reported itself into its own
/// [`JobError`]. Bodies it cannot read stay request errors.
pub(crate) async fn send_json_explained<T, F>(
    request: reqwest::RequestBuilder,
    explain: F,
) -> Result<T, JobError>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(&str) -> Option<JobError>,
{
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    if !status.is_success() {
        let body = body_text(response).await;
        return Err(explain(&body).unwrap_or_else(|| status_error(status, &body)));
    }
    response.json::<T>().await.map_err(transport)
}

/// Download `url` into `dest`.
pub(crate) async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(), JobError> {
    let unavailable = |e: JobError| JobError::ResultUnavailable(e.to_string());

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(transport(e)))?;
    let response = ensure_success(response).await.map_err(unavailable)?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| unavailable(transport(e)))?;
    write_artifact(dest, &bytes).await
}

/// Write artifact bytes, creating parent directories as needed.
pub(crate) async fn write_artifact(dest: &Path, bytes: &[u8]) -> Result<(), JobError> {
    let unavailable = |e: std::io::Error| {
        JobError::ResultUnavailable(format!("Failed to write {}: {e}", dest.display()))
    };
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
    }
    tokio::fs::write(dest, bytes).await.map_err(unavailable)
}
