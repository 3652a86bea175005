//! The lip-sync workflow template and its parameter injection.
//!
//! The template is an API-format ComfyUI graph exported once and kept on
//! disk. Building a run means cloning it and writing the uploaded input
//! names, the audio trim window and optional prompts into fixed nodes.

use std::path::Path;

use serde_json::Value;

use mvforge_core::shot::TrimMarkers;

use crate::api::UploadedFile;

/// Video loader node; `inputs.video` takes the uploaded clip name.
pub const VIDEO_INPUT_NODE: &str = "228";
/// Audio loader node; `inputs.audio` takes the uploaded track name.
pub const AUDIO_INPUT_NODE: &str = "125";
/// Audio trim node; `inputs.start_time` / `inputs.end_time`.
pub const TRIM_NODE: &str = "308";
/// Text encoder node; `inputs.positive_prompt` / `inputs.negative_prompt`.
pub const PROMPT_NODE: &str = "241";
/// Video combine node whose history output holds the result.
pub const OUTPUT_NODE: &str = "131";

/// Per-run parameters for the lip-sync graph.
#[derive(Debug, Clone)]
pub struct LipSyncInputs {
    pub video: UploadedFile,
    pub audio: UploadedFile,
    pub trim: TrimMarkers,
    /// Left as the template's value when `None` or blank.
    pub positive_prompt: Option<String>,
    /// Left as the template's value when `None` or blank.
    pub negative_prompt: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Workflow has no inputs object for node {0}")]
    MissingNode(&'static str),
}

/// A loaded lip-sync workflow template.
#[derive(Debug, Clone)]
pub struct LipSyncWorkflow {
    template: Value,
}

impl LipSyncWorkflow {
    /// Validate that every node the builder writes to is present.
    pub fn from_value(template: Value) -> Result<Self, WorkflowError> {
        for node in [VIDEO_INPUT_NODE, AUDIO_INPUT_NODE, TRIM_NODE, PROMPT_NODE] {
            if !template
                .get(node)
                .and_then(|n| n.get("inputs"))
                .is_some_and(Value::is_object)
            {
                return Err(WorkflowError::MissingNode(node));
            }
        }
        Ok(Self { template })
    }

    pub async fn load(path: &Path) -> Result<Self, WorkflowError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkflowError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_value(serde_json::from_str(&raw)?)
    }

    /// A fresh graph for one run. The template is never mutated.
    pub fn build(&self, inputs: &LipSyncInputs) -> Value {
        let mut graph = self.template.clone();

        set_input(&mut graph, VIDEO_INPUT_NODE, "video", &inputs.video.name);
        set_input(&mut graph, AUDIO_INPUT_NODE, "audio", &inputs.audio.name);
        set_input(&mut graph, TRIM_NODE, "start_time", &inputs.trim.start_time);
        set_input(&mut graph, TRIM_NODE, "end_time", &inputs.trim.end_time);

        if let Some(prompt) = non_blank(&inputs.positive_prompt) {
            set_input(&mut graph, PROMPT_NODE, "positive_prompt", prompt);
        }
        if let Some(prompt) = non_blank(&inputs.negative_prompt) {
            set_input(&mut graph, PROMPT_NODE, "negative_prompt", prompt);
        }

        graph
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

// Node presence is checked in `from_value`.
fn set_input(graph: &mut Value, node: &str, field: &str, value: &str) {
    if let Some(inputs) = graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        inputs.insert(field.to_string(), Value::String(value.to_string()));
    }
}
