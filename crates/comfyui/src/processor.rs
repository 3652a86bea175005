//! Frame loop for one listener connection.
//!
//! Each text frame becomes a tracker transition plus, when something
//! changed, a [`ListenerEvent`] on the session's broadcast channel.
//! Tracker locks are held only for the update and a send with no
//! subscribers is dropped, so a slow consumer never stalls the socket.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use mvforge_core::job::Progress;

use crate::events::ListenerEvent;
use crate::messages::{
    is_handled_kind, message_type, parse_message, ComfyUIMessage, ErrorData, ExecutingData,
    ProgressData,
};
use crate::tracker::JobTracker;

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server sent a close frame.
    Closed,
    /// The stream ended without a close frame.
    Exhausted,
    /// A receive error broke the connection.
    Error(String),
    /// The session was shut down.
    Cancelled,
}

/// Drain `ws_stream` into `tracker` until the connection ends or
/// `cancel` fires. Unparseable frames are logged and skipped; binary
/// preview frames are dropped.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = ws_stream.next() => match next {
                Some(msg) => msg,
                None => {
                    tracing::info!("ComfyUI socket ended without close frame");
                    return StreamEnd::Exhausted;
                }
            },
        };

        match received {
            Ok(Message::Text(text)) => handle_text_message(&text, tracker, event_tx),
            Ok(Message::Binary(data)) => tracing::trace!(bytes = data.len(), "Preview frame dropped"),
            // tungstenite answers pings itself.
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI closed the socket");
                return StreamEnd::Closed;
            }
            Err(e) => {
                tracing::error!(error = %e, "ComfyUI socket read failed");
                return StreamEnd::Error(e.to_string());
            }
        }
    }
}

/// Apply one text frame.
pub fn handle_text_message(
    text: &str,
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
) {
    match parse_message(text) {
        Ok(msg) => match msg {
            ComfyUIMessage::Progress(data) => {
                handle_progress(tracker, event_tx, &data);
            }
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Prompt started");
                tracker.mark_running(&data.prompt_id, None);
            }
            ComfyUIMessage::Executing(data) => {
                handle_executing(tracker, event_tx, &data);
            }
            ComfyUIMessage::ExecutionError(data) => {
                handle_execution_error(tracker, event_tx, &data);
            }
            ComfyUIMessage::Status(data) => {
                let queue_remaining = data.queue_remaining();
                tracing::debug!(queue_remaining, "ComfyUI queue status");
                let _ = event_tx.send(ListenerEvent::QueueStatus { queue_remaining });
            }
        },
        Err(e) => match message_type(text) {
            Some(kind) if !is_handled_kind(&kind) => {
                tracing::debug!(kind = %kind, "Unhandled ComfyUI frame kind");
            }
            kind => {
                tracing::warn!(
                    kind = kind.as_deref().unwrap_or("unknown"),
                    error = %e,
                    raw_message = %text,
                    "Malformed ComfyUI frame",
                );
            }
        },
    }
}

fn handle_progress(
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
    data: &ProgressData,
) {
    let progress = Progress::from_raw(data.value, data.max);
    let Some(prompt_id) = tracker.update_progress(data.prompt_id.as_deref(), progress) else {
        tracing::debug!(
            value = data.value,
            max = data.max,
            "Progress for no executing prompt",
        );
        return;
    };

    let current_node = data.node.clone().or_else(|| {
        tracker
            .snapshot(&prompt_id)
            .and_then(|job| job.current_stage().map(str::to_string))
    });

    tracing::debug!(
        prompt_id = %prompt_id,
        value = progress.value(),
        max = progress.max(),
        percent = progress.percent(),
        "Generation progress",
    );

    let _ = event_tx.send(ListenerEvent::Progress {
        prompt_id,
        value: progress.value(),
        max: progress.max(),
        percent: progress.percent(),
        current_node,
    });
}

fn handle_executing(
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
    data: &ExecutingData,
) {
    match data.node {
        Some(ref node) => {
            tracing::debug!(
                prompt_id = %data.prompt_id,
                node = %node,
                "Executing node",
            );
            tracker.mark_running(&data.prompt_id, Some(node.clone()));
        }
        None => {
            if tracker.mark_succeeded(&data.prompt_id) {
                tracing::info!(
                    prompt_id = %data.prompt_id,
                    "Prompt finished",
                );
                let _ = event_tx.send(ListenerEvent::Completed {
                    prompt_id: data.prompt_id.clone(),
                });
            }
        }
    }
}

fn handle_execution_error(
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
    data: &ErrorData,
) {
    tracing::error!(
        prompt_id = %data.prompt_id,
        node_id = ?data.node_id,
        error_type = %data.exception_type,
        error_message = %data.exception_message,
        "Execution error",
    );
    let error = data.describe();
    if tracker.mark_failed(&data.prompt_id, error.clone()) {
        let _ = event_tx.send(ListenerEvent::Failed {
            prompt_id: data.prompt_id.clone(),
            error,
        });
    }
}
