//! The capability every backend exposes to the shot pipeline.
//!
//! Three completion styles sit behind one trait: polling a status
//! endpoint, a single blocking call, and waiting on an event stream. The
//! pipeline only ever sees [`JobAdapter`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use mvforge_core::error::JobError;
use mvforge_core::job::{ArtifactRef, JobHandle, JobKind};
use mvforge_core::shot::{normalize_duration, TrimMarkers};

/// Image size for text-to-image generation.
pub const TEXT_TO_IMAGE_SIZE: &str = "2K";

/// Image size for reference-conditioned edits (first frames).
pub const IMAGE_EDIT_SIZE: &str = "2560x1440";

/// Uniform `submit -> await_result -> fetch` contract.
#[async_trait]
pub trait JobAdapter: Send + Sync {
    type Request: Send + Sync;

    fn kind(&self) -> JobKind;

    /// Start a job. Returns once the backend has accepted it.
    async fn submit(&self, request: &Self::Request) -> Result<JobHandle, JobError>;

    /// Wait for a terminal state. On expiry the job is abandoned locally
    /// with [`JobError::TimedOut`]; the remote job is never cancelled.
    async fn await_result(
        &self,
        handle: &JobHandle,
        timeout: Duration,
    ) -> Result<ArtifactRef, JobError>;

    /// Retrieve the artifact and write it to `dest`. Failures here are
    /// [`JobError::ResultUnavailable`].
    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<PathBuf, JobError>;

    /// Submit, wait and fetch in one go.
    async fn run(
        &self,
        request: &Self::Request,
        timeout: Duration,
        dest: &Path,
    ) -> Result<PathBuf, JobError> {
        let handle = self.submit(request).await?;
        tracing::info!(
            job_id = %handle.job_id,
            kind = self.kind().label(),
            "Job submitted",
        );
        let artifact = self.await_result(&handle, timeout).await?;
        let path = self.fetch(&artifact, dest).await?;
        tracing::info!(
            job_id = %handle.job_id,
            path = %path.display(),
            "Job artifact saved",
        );
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Image generation, optionally conditioned on a reference image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub reference: Option<PathBuf>,
    pub size: String,
}

impl ImageRequest {
    /// Text-to-image at the default size.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference: None,
            size: TEXT_TO_IMAGE_SIZE.to_string(),
        }
    }

    /// Edit of an existing image (first frame from a character reference).
    pub fn edit(prompt: impl Into<String>, reference: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            reference: Some(reference.into()),
            size: IMAGE_EDIT_SIZE.to_string(),
        }
    }
}

/// Video generation. The duration is always one the backend accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    pub prompt: String,
    pub first_frame: Option<PathBuf>,
    duration_secs: u32,
}

impl VideoRequest {
    pub fn text_only(prompt: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            prompt: prompt.into(),
            first_frame: None,
            duration_secs: normalize_duration(duration_secs),
        }
    }

    pub fn image_conditioned(
        prompt: impl Into<String>,
        first_frame: impl Into<PathBuf>,
        duration_secs: u32,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            first_frame: Some(first_frame.into()),
            duration_secs: normalize_duration(duration_secs),
        }
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }
}

/// Lip-sync of an existing clip to a window of an audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LipSyncRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub trim: TrimMarkers,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
}
