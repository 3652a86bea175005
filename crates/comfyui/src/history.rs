//! Reading finished prompts out of `/history/{prompt_id}`.
//!
//! History is the authoritative record of a prompt once it has left the
//! queue. The listener uses it to reconcile jobs whose completion event
//! may have been missed during a reconnect, and the lip-sync adapter
//! uses it to locate the files a workflow produced.

use serde_json::Value;

use crate::api::OutputFile;

/// Output fields checked on a node, in order of preference. Video
/// combine nodes report under `gifs` even for mp4 output.
pub const OUTPUT_FIELDS: [&str; 3] = ["gifs", "videos", "images"];

/// What history says about a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Not in history yet: still queued or running.
    Pending,
    Completed,
    Failed(String),
}

/// Failures locating a prompt's output files.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Prompt {0} not found in history")]
    PromptNotFound(String),

    #[error("Node {node} produced no output files")]
    NoOutput { node: String },

    #[error("Malformed output entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Classify a prompt from its history document.
pub fn history_outcome(history: &Value, prompt_id: &str) -> HistoryOutcome {
    let Some(entry) = history.get(prompt_id) else {
        return HistoryOutcome::Pending;
    };

    let status = entry.get("status");
    let status_str = status
        .and_then(|s| s.get("status_str"))
        .and_then(Value::as_str);

    if status_str == Some("error") {
        return HistoryOutcome::Failed(
            execution_error_message(status).unwrap_or_else(|| "execution error".to_string()),
        );
    }

    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let has_outputs = entry
        .get("outputs")
        .and_then(Value::as_object)
        .is_some_and(|o| !o.is_empty());

    if completed || status_str == Some("success") || has_outputs {
        HistoryOutcome::Completed
    } else {
        HistoryOutcome::Pending
    }
}

/// Pull the exception text out of `status.messages`, which is a list of
/// `[event_name, payload]` pairs.
fn execution_error_message(status: Option<&Value>) -> Option<String> {
    status?
        .get("messages")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .and_then(|payload| payload.get("exception_message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Files produced by `node` for `prompt_id`.
///
/// The first present field of [`OUTPUT_FIELDS`] is used. An empty list
/// is reported as [`HistoryError::NoOutput`].
pub fn extract_output_files(
    history: &Value,
    prompt_id: &str,
    node: &str,
) -> Result<Vec<OutputFile>, HistoryError> {
    let entry = history
        .get(prompt_id)
        .ok_or_else(|| HistoryError::PromptNotFound(prompt_id.to_string()))?;

    let node_output = entry.get("outputs").and_then(|o| o.get(node));

    let files = node_output
        .and_then(|out| OUTPUT_FIELDS.iter().find_map(|field| out.get(*field)))
        .cloned()
        .map(serde_json::from_value::<Vec<OutputFile>>)
        .transpose()?
        .unwrap_or_default();

    if files.is_empty() {
        return Err(HistoryError::NoOutput {
            node: node.to_string(),
        });
    }
    Ok(files)
}
