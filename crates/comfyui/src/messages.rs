//! Typed events from the ComfyUI WebSocket.
//!
//! Frames look like `{"type": "<kind>", "data": {...}}`. Only the kinds
//! that move a job through its lifecycle are modelled; anything else
//! fails to parse and is reported by [`message_type`] so the listener can
//! tell an unhandled kind from a malformed frame.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue telemetry.
    Status(StatusData),
    ExecutionStart(ExecutionStartData),
    /// Node-level stage change; a null node ends the prompt.
    Executing(ExecutingData),
    /// Step progress inside a node.
    Progress(ProgressData),
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    status: ServerStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerStatus {
    exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecInfo {
    queue_remaining: i32,
}

impl StatusData {
    pub fn queue_remaining(&self) -> i32 {
        self.status.exec_info.queue_remaining
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    /// `None` once the whole prompt has finished.
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Older servers omit `prompt_id`; the tracker then attributes progress
/// to the job currently executing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    #[serde(default)]
    pub value: i64,
    /// May be zero or missing.
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub exception_message: String,
}

impl ErrorData {
    /// Failure message recorded on the job.
    pub fn describe(&self) -> String {
        let mut message = if self.exception_type.is_empty() {
            self.exception_message.clone()
        } else {
            format!("{}: {}", self.exception_type, self.exception_message)
        };
        if let Some(node) = &self.node_id {
            if message.is_empty() {
                message = format!("failed at node {node}");
            } else {
                message.push_str(&format!(" (node {node})"));
            }
        }
        message
    }
}

pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Frame kinds modelled by [`ComfyUIMessage`].
pub const HANDLED_KINDS: [&str; 5] = [
    "status",
    "execution_start",
    "executing",
    "progress",
    "execution_error",
];

/// A frame of a handled kind that fails to parse is malformed; any other
/// kind is merely unmodelled.
pub fn is_handled_kind(kind: &str) -> bool {
    HANDLED_KINDS.contains(&kind)
}

/// The `type` of a frame that is valid JSON, whatever its kind.
pub fn message_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}
