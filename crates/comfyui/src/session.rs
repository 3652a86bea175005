//! A long-lived listener session against one ComfyUI server.
//!
//! [`ComfyUISession`] owns the WebSocket listener for the lifetime of a
//! batch. It spawns a single task (connect -> process -> reconnect) that
//! writes job state into a shared [`JobTracker`], while pipeline workers
//! submit prompts and wait on the tracker concurrently.
//!
//! Telemetry is broadcast via a [`tokio::sync::broadcast`] channel; call
//! [`ComfyUISession::subscribe`] to receive it. Connection health is
//! published on a [`tokio::sync::watch`] channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mvforge_core::config::{parse_or, process_env, string_or};
use mvforge_core::error::CoreError;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIStream};
use crate::events::ListenerEvent;
use crate::history::{history_outcome, HistoryOutcome};
use crate::processor::{process_messages, StreamEnd};
use crate::reconnect::{reconnect_loop, ReconnectConfig, ReconnectFailure};
use crate::tracker::JobTracker;

/// Broadcast channel capacity for telemetry events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long [`ComfyUISession::shutdown`] waits for the listener task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default server address (`host:port`).
pub const DEFAULT_ADDRESS: &str = "localhost:8190";

/// Connection settings for a ComfyUI server.
///
/// | Variable                     | Default          |
/// |------------------------------|------------------|
/// | `COMFYUI_ADDRESS`            | `localhost:8190` |
/// | `COMFYUI_RECONNECT_ATTEMPTS` | `5`              |
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// `host:port`, or a full `http(s)://` / `ws(s)://` base URL.
    pub address: String,
    pub reconnect: ReconnectConfig,
}

impl Default for ComfyUIConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ComfyUIConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ReconnectConfig::default();
        Ok(Self {
            address: string_or(&lookup, "COMFYUI_ADDRESS", DEFAULT_ADDRESS),
            reconnect: ReconnectConfig {
                max_attempts: parse_or(
                    &lookup,
                    "COMFYUI_RECONNECT_ATTEMPTS",
                    defaults.max_attempts,
                )?,
                ..defaults
            },
        })
    }

    /// WebSocket base URL derived from the address.
    pub fn ws_url(&self) -> String {
        let (secure, host) = split_scheme(&self.address);
        format!("{}://{host}", if secure { "wss" } else { "ws" })
    }

    /// HTTP base URL derived from the address.
    pub fn api_url(&self) -> String {
        let (secure, host) = split_scheme(&self.address);
        format!("{}://{host}", if secure { "https" } else { "http" })
    }
}

/// Strip any scheme and trailing slash, remembering whether it was TLS.
fn split_scheme(address: &str) -> (bool, &str) {
    let address = address.trim().trim_end_matches('/');
    for (prefix, secure) in [
        ("https://", true),
        ("wss://", true),
        ("http://", false),
        ("ws://", false),
    ] {
        if let Some(rest) = address.strip_prefix(prefix) {
            return (secure, rest);
        }
    }
    (false, address)
}

/// Listener connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerHealth {
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection gave up. Outstanding waits resolve by timeout only.
    Lost,
    /// The session was shut down.
    Stopped,
}

/// Errors from session startup and submission.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ComfyUIClientError),

    #[error("Failed to submit workflow: {0}")]
    Submit(#[from] ComfyUIApiError),
}

/// One listener connection plus the tracker it feeds.
///
/// Created once per batch via [`ComfyUISession::start`]; the returned
/// `Arc` is shared by every lip-sync worker.
pub struct ComfyUISession {
    client_id: String,
    api: ComfyUIApi,
    tracker: Arc<JobTracker>,
    event_tx: broadcast::Sender<ListenerEvent>,
    health_rx: watch::Receiver<ListenerHealth>,
    cancel: CancellationToken,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ComfyUISession {
    /// Connect and spawn the listener task.
    ///
    /// The first connection must succeed; reconnection only applies once
    /// a session is established.
    pub async fn start(config: &ComfyUIConfig) -> Result<Arc<Self>, SessionError> {
        let client = ComfyUIClient::new(config.ws_url(), config.api_url());
        let api = ComfyUIApi::new(config.api_url());
        let conn = client.connect().await?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (health_tx, health_rx) = watch::channel(ListenerHealth::Connected);
        let tracker = Arc::new(JobTracker::new());
        let cancel = CancellationToken::new();

        let listener = Listener {
            client,
            api: api.clone(),
            tracker: Arc::clone(&tracker),
            event_tx: event_tx.clone(),
            health_tx,
            reconnect: config.reconnect.clone(),
            cancel: cancel.clone(),
        };

        let client_id = conn.client_id.clone();
        let task_handle = tokio::spawn(async move {
            tracing::info!(client_id = %listener.client.client_id(), "Starting listener task");
            listener.run(conn.ws_stream).await;
            tracing::info!(client_id = %listener.client.client_id(), "Listener task exited");
        });

        Ok(Arc::new(Self {
            client_id,
            api,
            tracker,
            event_tx,
            health_rx,
            cancel,
            task_handle: Mutex::new(Some(task_handle)),
        }))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// HTTP API bound to the same server.
    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Subscribe to listener telemetry.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.event_tx.subscribe()
    }

    /// Current connection health.
    pub fn health(&self) -> ListenerHealth {
        *self.health_rx.borrow()
    }

    /// Watch health transitions.
    pub fn health_watch(&self) -> watch::Receiver<ListenerHealth> {
        self.health_rx.clone()
    }

    /// Queue a workflow under this session's client id and start
    /// tracking it. Returns the prompt id.
    pub async fn submit_workflow(&self, workflow: &serde_json::Value) -> Result<String, SessionError> {
        let response = self.api.submit_workflow(workflow, &self.client_id).await?;
        self.tracker.register(&response.prompt_id);
        tracing::info!(
            client_id = %self.client_id,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    /// Stop the listener and wait briefly for it to exit.
    pub async fn shutdown(&self) {
        tracing::info!(client_id = %self.client_id, "Shutting down ComfyUI session");
        self.cancel.cancel();

        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }
    }
}

impl Drop for ComfyUISession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the listener task.
struct Listener {
    client: ComfyUIClient,
    api: ComfyUIApi,
    tracker: Arc<JobTracker>,
    event_tx: broadcast::Sender<ListenerEvent>,
    health_tx: watch::Sender<ListenerHealth>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

impl Listener {
    /// Core loop: process messages -> reconnect -> reconcile.
    ///
    /// Runs until cancelled or reconnection is exhausted.
    async fn run(&self, mut ws_stream: ComfyUIStream) {
        let client_id = self.client.client_id().to_string();
        let _ = self.event_tx.send(ListenerEvent::Connected {
            client_id: client_id.clone(),
        });

        loop {
            let end = process_messages(&mut ws_stream, &self.tracker, &self.event_tx, &self.cancel).await;
            if end == StreamEnd::Cancelled {
                self.health_tx.send_replace(ListenerHealth::Stopped);
                return;
            }

            tracing::warn!(client_id = %client_id, reason = ?end, "Listener connection dropped");
            let _ = self.event_tx.send(ListenerEvent::Disconnected {
                client_id: client_id.clone(),
            });

            let reconnected = reconnect_loop(&self.client, &self.reconnect, &self.cancel, |attempt| {
                self.health_tx
                    .send_replace(ListenerHealth::Reconnecting { attempt });
                let _ = self.event_tx.send(ListenerEvent::Reconnecting {
                    client_id: client_id.clone(),
                    attempt,
                });
            })
            .await;

            match reconnected {
                Ok(conn) => {
                    ws_stream = conn.ws_stream;
                    self.health_tx.send_replace(ListenerHealth::Connected);
                    let _ = self.event_tx.send(ListenerEvent::Connected {
                        client_id: client_id.clone(),
                    });
                    self.spawn_reconcile();
                }
                Err(ReconnectFailure::Cancelled) => {
                    self.health_tx.send_replace(ListenerHealth::Stopped);
                    return;
                }
                Err(ReconnectFailure::Exhausted { attempts }) => {
                    tracing::error!(
                        client_id = %client_id,
                        attempts,
                        outstanding = self.tracker.outstanding().len(),
                        "ComfyUI listener lost",
                    );
                    self.health_tx.send_replace(ListenerHealth::Lost);
                    let _ = self.event_tx.send(ListenerEvent::Lost { client_id });
                    return;
                }
            }
        }
    }

    /// Resolve jobs whose terminal event may have been sent while the
    /// socket was down. Runs beside the listener so event processing on
    /// the new connection is not held up by HTTP calls.
    fn spawn_reconcile(&self) {
        let outstanding = self.tracker.outstanding();
        if outstanding.is_empty() {
            return;
        }
        let api = self.api.clone();
        let tracker = Arc::clone(&self.tracker);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            reconcile(&api, &tracker, &event_tx, outstanding).await;
        });
    }
}

/// Check history for each prompt and apply any terminal outcome found.
async fn reconcile(
    api: &ComfyUIApi,
    tracker: &JobTracker,
    event_tx: &broadcast::Sender<ListenerEvent>,
    prompt_ids: Vec<String>,
) {
    tracing::info!(count = prompt_ids.len(), "Reconciling outstanding prompts from history");

    for prompt_id in prompt_ids {
        let history = match api.get_history(&prompt_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "History lookup failed");
                continue;
            }
        };

        match history_outcome(&history, &prompt_id) {
            HistoryOutcome::Completed => {
                if tracker.mark_succeeded(&prompt_id) {
                    tracing::info!(prompt_id = %prompt_id, "Prompt completed while disconnected");
                    let _ = event_tx.send(ListenerEvent::Completed { prompt_id });
                }
            }
            HistoryOutcome::Failed(error) => {
                if tracker.mark_failed(&prompt_id, error.clone()) {
                    tracing::warn!(prompt_id = %prompt_id, error = %error, "Prompt failed while disconnected");
                    let _ = event_tx.send(ListenerEvent::Failed { prompt_id, error });
                }
            }
            HistoryOutcome::Pending => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn urls_from_bare_address() {
        let config = ComfyUIConfig::default();
        assert_eq!(config.ws_url(), "ws://localhost:8190");
        assert_eq!(config.api_url(), "http://localhost:8190");
    }

    #[test]
    fn urls_from_https_address() {
        let config = ComfyUIConfig {
            address: "https://gpu.example.com/".into(),
            ..Default::default()
        };
        assert_eq!(config.ws_url(), "wss://gpu.example.com");
        assert_eq!(config.api_url(), "https://gpu.example.com");
    }

    #[test]
    fn config_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("COMFYUI_ADDRESS", "10.0.0.5:8188"),
            ("COMFYUI_RECONNECT_ATTEMPTS", "2"),
        ]
        .into_iter()
        .collect();
        let config = ComfyUIConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.address, "10.0.0.5:8188");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn config_rejects_bad_attempts() {
        let result = ComfyUIConfig::from_lookup(|k| {
            (k == "COMFYUI_RECONNECT_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn start_fails_when_server_unreachable() {
        let config = ComfyUIConfig {
            address: "127.0.0.1:9".into(),
            ..Default::default()
        };
        let result = ComfyUISession::start(&config).await;
        assert!(matches!(result, Err(SessionError::Connect(_))));
    }
}
