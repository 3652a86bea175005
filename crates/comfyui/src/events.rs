//! Telemetry events emitted by a listener session.
//!
//! These mirror what the listener applies to the job tracker, plus
//! connection health changes, for display-side subscribers. Nothing in
//! the pipeline depends on receiving them: completion is read from the
//! tracker, never from this channel.

use serde::Serialize;

/// A telemetry event originating from a ComfyUI listener session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// The WebSocket connection was established (or re-established).
    Connected { client_id: String },

    /// The WebSocket connection dropped.
    Disconnected { client_id: String },

    /// A reconnection attempt is about to be made.
    Reconnecting { client_id: String, attempt: u32 },

    /// Reconnection gave up; outstanding jobs will resolve by timeout.
    Lost { client_id: String },

    /// Server queue depth broadcast.
    QueueStatus { queue_remaining: i32 },

    /// A job made progress (step N of M).
    Progress {
        prompt_id: String,
        value: u32,
        max: u32,
        /// Completion percentage (0-100).
        percent: f64,
        /// The node currently executing, if known.
        current_node: Option<String>,
    },

    /// A job completed successfully.
    Completed { prompt_id: String },

    /// A job failed with an error.
    Failed { prompt_id: String, error: String },
}
