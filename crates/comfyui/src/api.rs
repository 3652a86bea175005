//! ComfyUI REST endpoints used by the lip-sync flow: input upload,
//! prompt queueing, history and output download.
//!
//! Nothing here cancels a queued prompt. An abandoned wait just stops
//! observing it.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use mvforge_core::media::mime_for_path;

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ComfyUI returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cannot read upload {path}: {source}")]
    ReadInput {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Answer to `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Queue position at submission time.
    #[serde(default)]
    pub number: i32,
}

/// Where `/upload/image` stored an input. Workflow nodes refer to it by
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "FileKind::input")]
    pub kind: String,
}

/// A node output listed in history, fetched through `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "FileKind::output")]
    pub kind: String,
}

struct FileKind;

impl FileKind {
    fn input() -> String {
        "input".to_string()
    }

    fn output() -> String {
        "output".to_string()
    }
}

#[derive(Clone)]
pub struct ComfyUIApi {
    http: reqwest::Client,
    api_url: String,
}

impl ComfyUIApi {
    /// `api_url` is the server's HTTP base, e.g. `http://host:8190`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(http: reqwest::Client, api_url: String) -> Self {
        Self { http, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }

    /// Upload a local file to the input directory, overwriting any file
    /// of the same name. Despite its path the endpoint takes any media.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadedFile, ComfyUIApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ComfyUIApiError::ReadInput {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());

        let form = Form::new()
            .part(
                "image",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime_for_path(path))?,
            )
            .text("type", "input")
            .text("overwrite", "true");

        read_json(self.http.post(self.endpoint("upload/image")).multipart(form)).await
    }

    /// Queue a workflow. Its events go to the WebSocket registered under
    /// `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
            "return_temp_files": false,
        });
        read_json(self.http.post(self.endpoint("prompt")).json(&body)).await
    }

    /// History entry of one prompt, keyed by prompt id.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        read_json(self.http.get(self.endpoint(&format!("history/{prompt_id}")))).await
    }

    /// Raw bytes of an output file.
    pub async fn view(&self, file: &OutputFile) -> Result<Vec<u8>, ComfyUIApiError> {
        let request = self.http.get(self.endpoint("view")).query(&[
            ("filename", file.filename.as_str()),
            ("subfolder", file.subfolder.as_str()),
            ("type", file.kind.as_str()),
        ]);
        let response = checked(request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Turn a non-2xx response into [`ComfyUIApiError::Status`].
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ComfyUIApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ComfyUIApiError> {
    let response = checked(request.send().await?).await?;
    Ok(response.json().await?)
}
