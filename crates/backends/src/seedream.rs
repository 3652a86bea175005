//! Volcengine Ark Seedream image generation (blocking).
//!
//! One `POST /images/generations` call returns a URL to the finished
//! image. Passing a reference image turns the call into an edit.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mvforge_core::config::{process_env, required, string_or};
use mvforge_core::error::{CoreError, JobError};
use mvforge_core::job::ArtifactRef;

use crate::adapter::ImageRequest;
use crate::blocking::{BlockingAdapter, BlockingBackend};
use crate::data_url;
use crate::http::{download_to, send_json_explained};

pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_MODEL: &str = "doubao-seedream-4-0-250828";

/// Image backend settings.
///
/// | Variable         | Default                                    |
/// |------------------|--------------------------------------------|
/// | `ARK_API_KEY`    | (required)                                 |
/// | `ARK_BASE_URL`   | `https://ark.cn-beijing.volces.com/api/v3` |
/// | `SEEDREAM_MODEL` | `doubao-seedream-4-0-250828`               |
#[derive(Debug, Clone)]
pub struct SeedreamConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl SeedreamConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: required(&lookup, "ARK_API_KEY")?,
            base_url: string_or(&lookup, "ARK_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: string_or(&lookup, "SEEDREAM_MODEL", DEFAULT_MODEL),
        })
    }
}

/// The Seedream image adapter.
pub type SeedreamAdapter = BlockingAdapter<SeedreamBackend>;

impl SeedreamAdapter {
    pub fn from_config(config: SeedreamConfig) -> Self {
        BlockingAdapter::new(SeedreamBackend::new(config))
    }
}

pub struct SeedreamBackend {
    client: reqwest::Client,
    config: SeedreamConfig,
}

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    response_format: &'static str,
    watermark: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl SeedreamBackend {
    pub fn new(config: SeedreamConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: SeedreamConfig) -> Self {
        Self { client, config }
    }
}

impl ApiError {
    fn into_job_error(self) -> JobError {
        JobError::RemoteFailure(format!("{}: {}", self.code, self.message))
    }
}

/// The `error` object of a rejected call's body, if it has one.
fn rejection(body: &str) -> Option<JobError> {
    serde_json::from_str::<GenerationResponse>(body)
        .ok()?
        .error
        .map(ApiError::into_job_error)
}

/// First image URL of a response, or the backend's own error.
fn first_image_url(response: GenerationResponse) -> Result<ArtifactRef, JobError> {
    if let Some(error) = response.error {
        return Err(error.into_job_error());
    }
    response
        .data
        .into_iter()
        .next()
        .and_then(|image| image.url)
        .and_then(ArtifactRef::new)
        .ok_or_else(|| JobError::RemoteFailure("No image returned".to_string()))
}

#[async_trait]
impl BlockingBackend for SeedreamBackend {
    type Request = ImageRequest;

    async fn generate(&self, request: &ImageRequest) -> Result<ArtifactRef, JobError> {
        let image = match &request.reference {
            Some(path) => Some(data_url::encode_file(path).await?),
            None => None,
        };
        let body = GenerationBody {
            model: &self.config.model,
            prompt: &request.prompt,
            size: &request.size,
            response_format: "url",
            watermark: false,
            image,
        };

        let response: GenerationResponse = send_json_explained(
            self.client
                .post(format!("{}/images/generations", self.config.base_url))
                .bearer_auth(&self.config.api_key)
                .json(&body),
            rejection,
        )
        .await?;

        let artifact = first_image_url(response)?;
        tracing::info!(
            size = %request.size,
            edit = request.reference.is_some(),
            "Seedream image generated",
        );
        Ok(artifact)
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<(), JobError> {
        download_to(&self.client, artifact.as_str(), dest).await
    }
}
