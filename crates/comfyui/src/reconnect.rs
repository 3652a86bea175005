//! Bounded exponential-backoff reconnection for the listener.
//!
//! When the WebSocket drops, the session calls [`reconnect_loop`] to
//! retry with increasing delays. Unlike a long-lived service connection,
//! a batch listener gives up after [`ReconnectConfig::max_attempts`] so
//! that waiters fall back to their timeouts instead of hanging forever.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Backoff schedule for re-opening the listener socket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for the wait between attempts.
    pub max_delay: Duration,
    /// Growth applied to the wait after every failed attempt.
    pub multiplier: f64,
    /// Attempts before the listener is declared lost. Zero disables
    /// reconnection entirely.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Why [`reconnect_loop`] stopped without a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectFailure {
    /// The session was shut down.
    Cancelled,
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

/// Wait that follows `current`, never above [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Re-open the socket under the client's existing id, sleeping between
/// failed attempts. `on_attempt` sees each 1-based attempt number first.
pub async fn reconnect_loop<F>(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut on_attempt: F,
) -> Result<ComfyUIConnection, ReconnectFailure>
where
    F: FnMut(u32),
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        on_attempt(attempt);
        tracing::info!(
            client_id = client.client_id(),
            attempt,
            max_attempts = config.max_attempts,
            "Re-opening ComfyUI socket",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(client_id = client.client_id(), "Session shut down during reconnect");
                return Err(ReconnectFailure::Cancelled);
            }
            result = client.connect() => match result {
                Ok(conn) => {
                    tracing::info!(
                        client_id = client.client_id(),
                        attempt,
                        "ComfyUI socket re-opened",
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        client_id = client.client_id(),
                        error = %e,
                        "Socket attempt {attempt} failed",
                    );
                }
            }
        }

        if attempt == config.max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectFailure::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }

    tracing::error!(
        client_id = client.client_id(),
        attempts = config.max_attempts,
        "ComfyUI listener out of reconnect attempts",
    );
    Err(ReconnectFailure::Exhausted {
        attempts: config.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port_client() -> ComfyUIClient {
        ComfyUIClient::with_client_id(
            "fixed".into(),
            "ws://127.0.0.1:9".into(),
            "http://127.0.0.1:9".into(),
        )
    }

    #[test]
    fn backoff_doubles_then_clamps() {
        let config = ReconnectConfig::default();
        let delays: Vec<u64> = std::iter::successors(Some(config.initial_delay), |d| {
            Some(next_delay(*d, &config))
        })
        .take(7)
        .map(|d| d.as_secs())
        .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        let tight = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &tight), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts: 3,
            ..Default::default()
        };
        let mut seen = Vec::new();

        let result = reconnect_loop(
            &closed_port_client(),
            &config,
            &CancellationToken::new(),
            |attempt| seen.push(attempt),
        )
        .await;

        assert!(matches!(result, Err(ReconnectFailure::Exhausted { attempts: 3 })));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn zero_attempts_fails_without_trying() {
        let config = ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let mut calls = 0;
        let result = reconnect_loop(&closed_port_client(), &config, &CancellationToken::new(), |_| {
            calls += 1
        })
        .await;
        assert!(matches!(result, Err(ReconnectFailure::Exhausted { attempts: 0 })));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn cancelled_session_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconnect_loop(
            &closed_port_client(),
            &ReconnectConfig::default(),
            &cancel,
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(ReconnectFailure::Cancelled)));
    }
}
