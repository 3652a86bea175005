//! MiniMax Hailuo video generation (poll-based).
//!
//! `POST /video_generation` returns a task id; `GET
//! /query/video_generation` reports `Success` with a `file_id`, `Fail`
//! with a message, or an intermediate label; `GET /files/retrieve`
//! resolves the file id to a download URL.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mvforge_core::config::{parse_or, process_env, required, string_or};
use mvforge_core::error::{CoreError, JobError};
use mvforge_core::job::ArtifactRef;

use crate::adapter::VideoRequest;
use crate::data_url;
use crate::http::{download_to, send_json};
use crate::polling::{PollBackend, PollStatus, PollingAdapter, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_BASE_URL: &str = "https://api.minimaxi.com/v1";
pub const DEFAULT_MODEL: &str = "MiniMax-Hailuo-02";
pub const DEFAULT_RESOLUTION: &str = "768P";

/// Video backend settings.
///
/// | Variable                   | Default                       |
/// |----------------------------|-------------------------------|
/// | `MINIMAX_API_KEY`          | (required)                    |
/// | `MINIMAX_BASE_URL`         | `https://api.minimaxi.com/v1` |
/// | `HAILUO_MODEL`             | `MiniMax-Hailuo-02`           |
/// | `HAILUO_RESOLUTION`        | `768P`                        |
/// | `VIDEO_POLL_INTERVAL_SECS` | `10`                          |
#[derive(Debug, Clone)]
pub struct HailuoConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub resolution: String,
    pub poll_interval: Duration,
}

impl HailuoConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "MINIMAX_API_KEY")?,
            base_url: string_or(&lookup, "MINIMAX_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: string_or(&lookup, "HAILUO_MODEL", DEFAULT_MODEL),
            resolution: string_or(&lookup, "HAILUO_RESOLUTION", DEFAULT_RESOLUTION),
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "VIDEO_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs(),
            )?),
        })
    }
}

/// The Hailuo video generation adapter.
pub type HailuoAdapter = PollingAdapter<HailuoBackend>;

impl HailuoAdapter {
    pub fn from_config(config: HailuoConfig) -> Self {
        let interval = config.poll_interval;
        PollingAdapter::new(HailuoBackend::new(config), interval)
    }
}

/// Raw Hailuo API calls.
pub struct HailuoBackend {
    client: reqwest::Client,
    config: HailuoConfig,
}

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    prompt: &'a str,
    model: &'a str,
    duration: u32,
    resolution: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_frame_image: Option<String>,
}

/// Vendor-level result code carried in every response.
#[derive(Debug, Default, Deserialize)]
struct BaseResp {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    file: RetrievedFile,
}

#[derive(Debug, Deserialize)]
struct RetrievedFile {
    download_url: String,
}

impl HailuoBackend {
    pub fn new(config: HailuoConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: HailuoConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url)
    }
}

/// Map a status response onto [`PollStatus`].
///
/// A non-zero `base_resp.status_code` means the query itself was refused
/// (bad key, unknown task, rate limit) and is a remote failure. A response
/// with no `status` at all cannot be polled further.
fn classify_status(response: StatusResponse) -> Result<PollStatus, JobError> {
    if response.base_resp.status_code != 0 {
        return Err(JobError::RemoteFailure(format!(
            "{} (code {})",
            response.base_resp.status_msg, response.base_resp.status_code
        )));
    }
    match response.status.as_str() {
        "" => Err(JobError::Request(
            "query/video_generation returned no status".to_string(),
        )),
        "Success" => response
            .file_id
            .and_then(ArtifactRef::new)
            .map(PollStatus::Succeeded)
            .ok_or_else(|| {
                JobError::ResultUnavailable("Success reported without a file_id".to_string())
            }),
        "Fail" => {
            let message = response
                .error_message
                .filter(|m| !m.is_empty())
                .or_else(|| {
                    Some(response.base_resp.status_msg).filter(|m| !m.is_empty())
                })
                .unwrap_or_else(|| "unknown error".to_string());
            Ok(PollStatus::Failed(message))
        }
        other => Ok(PollStatus::InProgress(other.to_string())),
    }
}

#[async_trait]
impl PollBackend for HailuoBackend {
    type Request = VideoRequest;

    async fn submit(&self, request: &VideoRequest) -> Result<String, JobError> {
        let first_frame_image = match &request.first_frame {
            Some(path) => Some(data_url::encode_file(path).await?),
            None => None,
        };
        let body = GenerationBody {
            prompt: &request.prompt,
            model: &self.config.model,
            duration: request.duration_secs(),
            resolution: &self.config.resolution,
            first_frame_image,
        };

        let response: GenerationResponse = send_json(
            self.client
                .post(self.url("video_generation"))
                .bearer_auth(&self.config.api_key)
                .json(&body),
        )
        .await?;

        if response.base_resp.status_code != 0 {
            return Err(JobError::RemoteFailure(format!(
                "{} (code {})",
                response.base_resp.status_msg, response.base_resp.status_code
            )));
        }
        if response.task_id.is_empty() {
            return Err(JobError::RemoteFailure(
                "video_generation returned no task_id".to_string(),
            ));
        }

        tracing::info!(
            task_id = %response.task_id,
            duration = request.duration_secs(),
            image_conditioned = request.first_frame.is_some(),
            "Hailuo video task created",
        );
        Ok(response.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<PollStatus, JobError> {
        let response: StatusResponse = send_json(
            self.client
                .get(self.url("query/video_generation"))
                .bearer_auth(&self.config.api_key)
                .query(&[("task_id", job_id)]),
        )
        .await?;
        classify_status(response)
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<(), JobError> {
        let retrieved: RetrieveResponse = send_json(
            self.client
                .get(self.url("files/retrieve"))
                .bearer_auth(&self.config.api_key)
                .query(&[("file_id", artifact.as_str())]),
        )
        .await
        .map_err(|e| JobError::ResultUnavailable(e.to_string()))?;

        download_to(&self.client, &retrieved.file.download_url, dest).await
    }
}
