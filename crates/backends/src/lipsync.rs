//! ComfyUI lip-sync workflow (stream-based).
//!
//! `submit` uploads the clip and the audio track, builds the workflow
//! and queues it under the session's client id. Completion comes from
//! the session's listener through the shared [`JobTracker`]; this
//! adapter never polls.
//!
//! [`JobTracker`]: mvforge_comfyui::JobTracker

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mvforge_comfyui::history::extract_output_files;
use mvforge_comfyui::workflow::{LipSyncInputs, LipSyncWorkflow, OUTPUT_NODE};
use mvforge_comfyui::{ComfyUISession, ListenerHealth};
use mvforge_core::config::{process_env, string_or};
use mvforge_core::error::{CoreError, JobError};
use mvforge_core::job::{ArtifactRef, JobHandle, JobKind, Progress};

use crate::adapter::{JobAdapter, LipSyncRequest};
use crate::http::write_artifact;

pub const DEFAULT_WORKFLOW_PATH: &str = "workflows/lipsync.json";

/// Lip-sync settings.
///
/// | Variable                | Default                  |
/// |-------------------------|--------------------------|
/// | `LIPSYNC_WORKFLOW_PATH` | `workflows/lipsync.json` |
#[derive(Debug, Clone)]
pub struct LipSyncConfig {
    pub workflow_path: PathBuf,
}

impl LipSyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            workflow_path: string_or(&lookup, "LIPSYNC_WORKFLOW_PATH", DEFAULT_WORKFLOW_PATH)
                .into(),
        }
    }
}

pub struct LipSyncAdapter {
    session: Arc<ComfyUISession>,
    workflow: LipSyncWorkflow,
}

impl LipSyncAdapter {
    pub fn new(session: Arc<ComfyUISession>, workflow: LipSyncWorkflow) -> Self {
        Self { session, workflow }
    }

    /// Load the workflow template named by `config`.
    pub async fn from_config(
        session: Arc<ComfyUISession>,
        config: &LipSyncConfig,
    ) -> Result<Self, CoreError> {
        let workflow = LipSyncWorkflow::load(&config.workflow_path)
            .await
            .map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(Self::new(session, workflow))
    }

    /// Latest progress of a submitted job, for display only.
    pub fn progress(&self, handle: &JobHandle) -> Option<Progress> {
        self.session.tracker().progress(&handle.job_id)
    }

    async fn upload(&self, path: &Path) -> Result<mvforge_comfyui::api::UploadedFile, JobError> {
        let uploaded = self
            .session
            .api()
            .upload_file(path)
            .await
            .map_err(|e| JobError::Request(e.to_string()))?;
        tracing::debug!(path = %path.display(), stored_as = %uploaded.name, "Uploaded lip-sync input");
        Ok(uploaded)
    }
}

/// A wait that ran out while the listener was gone is reported as a lost
/// listener rather than a plain timeout.
fn classify_wait_error(err: JobError, health: ListenerHealth) -> JobError {
    match err {
        JobError::TimedOut { job_id, .. } if health == ListenerHealth::Lost => {
            JobError::ListenerLost { job_id }
        }
        other => other,
    }
}

#[async_trait]
impl JobAdapter for LipSyncAdapter {
    type Request = LipSyncRequest;

    fn kind(&self) -> JobKind {
        JobKind::StreamBased
    }

    async fn submit(&self, request: &LipSyncRequest) -> Result<JobHandle, JobError> {
        // Each upload completes before the next request is sent.
        let video = self.upload(&request.video).await?;
        let audio = self.upload(&request.audio).await?;

        let graph = self.workflow.build(&LipSyncInputs {
            video,
            audio,
            trim: request.trim.clone(),
            positive_prompt: request.positive_prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
        });

        let prompt_id = self
            .session
            .submit_workflow(&graph)
            .await
            .map_err(|e| JobError::Request(e.to_string()))?;
        Ok(JobHandle::new(prompt_id, JobKind::StreamBased))
    }

    async fn await_result(
        &self,
        handle: &JobHandle,
        timeout: Duration,
    ) -> Result<ArtifactRef, JobError> {
        match self.session.tracker().wait(&handle.job_id, timeout).await {
            Ok(job) => job.result_ref().cloned().ok_or_else(|| {
                JobError::ResultUnavailable(format!("Job {} has no result", handle.job_id))
            }),
            Err(err) => Err(classify_wait_error(err, self.session.health())),
        }
    }

    /// The artifact is the prompt id; its files are listed in history.
    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<PathBuf, JobError> {
        let api = self.session.api();

        let history = api
            .get_history(artifact.as_str())
            .await
            .map_err(|e| JobError::ResultUnavailable(e.to_string()))?;
        let files = extract_output_files(&history, artifact.as_str(), OUTPUT_NODE)
            .map_err(|e| JobError::ResultUnavailable(e.to_string()))?;

        // The last listed file is the final render.
        let Some(file) = files.last() else {
            return Err(JobError::ResultUnavailable(format!("Node {OUTPUT_NODE} listed no files")));
        };
        let bytes = api.view(file).await.map_err(|e| JobError::ResultUnavailable(e.to_string()))?;
        write_artifact(dest, &bytes).await?;

        tracing::info!(
            prompt_id = %artifact,
            output = %file.filename,
            path = %dest.display(),
            "Lip-sync output downloaded",
        );
        Ok(dest.to_path_buf())
    }
}
