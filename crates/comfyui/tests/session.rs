//! Integration tests for `ComfyUISession` against a local WebSocket
//! server standing in for ComfyUI.
//!
//! The server side is driven step by step so each test controls exactly
//! when events are pushed and when the connection drops.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use mvforge_comfyui::events::ListenerEvent;
use mvforge_comfyui::reconnect::ReconnectConfig;
use mvforge_comfyui::{ComfyUIConfig, ComfyUISession, ListenerHealth};
use mvforge_core::error::JobError;
use mvforge_core::job::JobState;

type ServerStream = WebSocketStream<tokio::net::TcpStream>;

fn config_for(listener: &TcpListener) -> ComfyUIConfig {
    let port = listener.local_addr().unwrap().port();
    ComfyUIConfig {
        address: format!("127.0.0.1:{port}"),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 3,
            ..Default::default()
        },
    }
}

/// Accept the next WebSocket handshake, returning the stream and the
/// request URI. Connections that are not WebSocket upgrades are skipped.
async fn accept_ws(listener: &TcpListener) -> (ServerStream, String) {
    loop {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        };
        if let Ok(ws) = accept_hdr_async(tcp, callback).await {
            return (ws, uri);
        }
    }
}

async fn push(ws: &mut ServerStream, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

/// Read until the client goes away.
async fn drain(mut ws: ServerStream) {
    while let Some(Ok(_)) = ws.next().await {}
}

// ---------------------------------------------------------------------------
// Test: completion pushed over the stream resolves a waiter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streamed_completion_resolves_wait() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);

    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept_ws(&listener).await;
        push(&mut ws, r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":1}}}}"#).await;
        push(&mut ws, r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#).await;
        push(&mut ws, r#"{"type":"progress","data":{"value":4,"max":8,"prompt_id":"p1","node":"241"}}"#).await;
        push(&mut ws, r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#).await;
        drain(ws).await;
        uri
    });

    let session = ComfyUISession::start(&config).await.unwrap();
    assert_eq!(session.health(), ListenerHealth::Connected);

    let job = session
        .tracker()
        .wait("p1", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(job.state(), &JobState::Succeeded);
    assert_eq!(job.progress().percent(), 50.0);

    session.shutdown().await;
    assert_eq!(session.health(), ListenerHealth::Stopped);

    let uri = server.await.unwrap();
    assert!(uri.contains(&format!("clientId={}", session.client_id())));
}

// ---------------------------------------------------------------------------
// Test: execution_error fails only the affected job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_error_fails_one_job_and_listener_continues() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_ws(&listener).await;
        push(&mut ws, r#"{"type":"execution_error","data":{"prompt_id":"bad","node_id":"228","exception_message":"file not found","exception_type":"FileNotFoundError"}}"#).await;
        push(&mut ws, "not json").await;
        push(&mut ws, r#"{"type":"executing","data":{"node":null,"prompt_id":"good"}}"#).await;
        drain(ws).await;
    });

    let session = ComfyUISession::start(&config).await.unwrap();
    let tracker = session.tracker();

    let err = tracker.wait("bad", Duration::from_secs(10)).await.unwrap_err();
    assert_eq!(
        err,
        JobError::RemoteFailure("FileNotFoundError: file not found (node 228)".into())
    );
    let job = tracker.wait("good", Duration::from_secs(10)).await.unwrap();
    assert_eq!(job.state(), &JobState::Succeeded);

    session.shutdown().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: reconnect reuses the client id and keeps tracking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_reuses_client_id_and_resumes_tracking() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);

    let server = tokio::spawn(async move {
        let (mut first, first_uri) = accept_ws(&listener).await;
        push(&mut first, r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#).await;
        first.close(None).await.unwrap();
        drop(first);

        let (mut second, second_uri) = accept_ws(&listener).await;
        push(&mut second, r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#).await;
        drain(second).await;
        (first_uri, second_uri)
    });

    let session = ComfyUISession::start(&config).await.unwrap();
    let mut events = session.subscribe();

    let job = session
        .tracker()
        .wait("p1", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(job.state(), &JobState::Succeeded);

    let mut saw_reconnecting = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ListenerEvent::Reconnecting { attempt: 1, .. }) {
            saw_reconnecting = true;
        }
    }
    assert!(saw_reconnecting, "expected a Reconnecting event");

    session.shutdown().await;
    let (first_uri, second_uri) = server.await.unwrap();
    assert_eq!(first_uri, second_uri, "reconnect must reuse the client id");
}

// ---------------------------------------------------------------------------
// Test: exhausted reconnection marks the session lost; waits time out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_reconnect_marks_session_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&listener);

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_ws(&listener).await;
        push(&mut ws, r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#).await;
        ws.close(None).await.unwrap();
        // Dropping the listener closes the port, so every reconnect fails.
    });

    let session = ComfyUISession::start(&config).await.unwrap();
    server.await.unwrap();

    let mut health = session.health_watch();
    tokio::time::timeout(
        Duration::from_secs(10),
        health.wait_for(|h| *h == ListenerHealth::Lost),
    )
    .await
    .expect("session should be declared lost")
    .unwrap();

    let err = session
        .tracker()
        .wait("p1", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::TimedOut { .. }));

    session.shutdown().await;
}
