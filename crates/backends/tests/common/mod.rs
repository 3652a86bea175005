//! Local stand-ins for remote services.
//!
//! `serve_once` answers a single HTTP request with a canned response.
//! [`ComfyStub`] plays a ComfyUI server on one port: WebSocket upgrades
//! are handed to the test to drive by hand, and the REST routes the
//! lip-sync flow uses are answered from shared state.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use mvforge_comfyui::reconnect::ReconnectConfig;
use mvforge_comfyui::ComfyUIConfig;

pub type ServerSocket = WebSocketStream<TcpStream>;

// ---------------------------------------------------------------------------
// Raw HTTP
// ---------------------------------------------------------------------------

/// A request as the stub received it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn query(&self, key: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Read one request, body included (requires `Content-Length`).
pub async fn read_request(stream: &mut TcpStream) -> HttpRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let head_end = loop {
        if let Some(end) = head_len(&buf) {
            break end;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up before the request head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap().split_whitespace();
    let method = request_line.next().unwrap().to_string();
    let target = request_line.next().unwrap().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    HttpRequest {
        method,
        target,
        body: buf[head_end..head_end + content_length].to_vec(),
    }
}

pub async fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
    let _ = stream.shutdown().await;
}

/// Answer exactly one request on a fresh port. Returns the base URL and a
/// handle yielding the request that was received.
pub async fn serve_once(status: u16, body: impl Into<String>) -> (String, JoinHandle<HttpRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let body = body.into();
    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        respond(&mut stream, status, "application/json", body.as_bytes()).await;
        request
    });
    (base_url, task)
}

// ---------------------------------------------------------------------------
// ComfyUI
// ---------------------------------------------------------------------------

/// Everything the REST side of the stub has seen or will serve.
#[derive(Default)]
pub struct ComfyState {
    /// Uploaded file names, in arrival order.
    pub uploads: Mutex<Vec<String>>,
    /// `/prompt` bodies, in arrival order.
    pub prompts: Mutex<Vec<Value>>,
    /// History entries by prompt id. Unknown ids answer `{}`.
    pub history: Mutex<Map<String, Value>>,
    /// Prompt ids looked up through `/history`.
    pub history_lookups: Mutex<Vec<String>>,
    /// File names fetched through `/view`.
    pub views: Mutex<Vec<String>>,
}

impl ComfyState {
    /// Record a finished prompt whose output node lists `files`.
    pub fn finish(&self, prompt_id: &str, node: &str, files: &[&str]) {
        let files: Vec<Value> = files
            .iter()
            .map(|name| json!({"filename": name, "subfolder": "", "type": "output"}))
            .collect();
        let mut outputs = Map::new();
        outputs.insert(node.to_string(), json!({ "gifs": files }));
        self.history.lock().unwrap().insert(
            prompt_id.to_string(),
            json!({
                "outputs": outputs,
                "status": {"status_str": "success", "completed": true, "messages": []}
            }),
        );
    }
}

pub struct ComfyStub {
    pub address: String,
    pub state: Arc<ComfyState>,
    sockets: mpsc::UnboundedReceiver<ServerSocket>,
    prompts: mpsc::UnboundedReceiver<String>,
}

impl ComfyStub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(ComfyState::default());
        let (socket_tx, sockets) = mpsc::unbounded_channel();
        let (prompt_tx, prompts) = mpsc::unbounded_channel();

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                let socket_tx = socket_tx.clone();
                let prompt_tx = prompt_tx.clone();
                tokio::spawn(async move {
                    if is_upgrade(&stream).await {
                        if let Ok(ws) = accept_async(stream).await {
                            let _ = socket_tx.send(ws);
                        }
                    } else {
                        serve_rest(stream, &state, &prompt_tx).await;
                    }
                });
            }
        });

        Self {
            address,
            state,
            sockets,
            prompts,
        }
    }

    /// Session settings pointing at the stub, with fast reconnects.
    pub fn config(&self) -> ComfyUIConfig {
        ComfyUIConfig {
            address: self.address.clone(),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                max_attempts: 3,
                ..Default::default()
            },
        }
    }

    /// The next event socket a client opened.
    pub async fn next_socket(&mut self) -> ServerSocket {
        tokio::time::timeout(Duration::from_secs(10), self.sockets.recv())
            .await
            .expect("no socket opened")
            .unwrap()
    }

    /// Id of the next prompt queued through `/prompt`.
    pub async fn next_prompt(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(10), self.prompts.recv())
            .await
            .expect("no prompt queued")
            .unwrap()
    }
}

pub async fn push(ws: &mut ServerSocket, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

/// Keep a socket open, reading until the client goes away.
pub fn hold(mut ws: ServerSocket) -> JoinHandle<()> {
    tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} })
}

async fn is_upgrade(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        if n == 0 {
            return false;
        }
        let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
        if head.contains("\r\n\r\n") || n == buf.len() {
            return head.contains("upgrade: websocket");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

enum Reply {
    Json(Value),
    Bytes(Vec<u8>),
}

fn uploaded_name(multipart: &str) -> String {
    let (_, rest) = multipart
        .split_once("filename=\"")
        .expect("upload without a file part");
    rest.split('"').next().unwrap_or_default().to_string()
}

async fn serve_rest(
    mut stream: TcpStream,
    state: &ComfyState,
    prompt_tx: &mpsc::UnboundedSender<String>,
) {
    let request = read_request(&mut stream).await;
    let path = request.path().to_string();

    let reply = match (request.method.as_str(), path.as_str()) {
        ("POST", "/upload/image") => {
            let name = uploaded_name(&request.body_text());
            state.uploads.lock().unwrap().push(name.clone());
            Reply::Json(json!({"name": name, "subfolder": "", "type": "input"}))
        }
        ("POST", "/prompt") => {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let number = {
                let mut prompts = state.prompts.lock().unwrap();
                prompts.push(body);
                prompts.len()
            };
            let prompt_id = format!("prompt-{number}");
            let _ = prompt_tx.send(prompt_id.clone());
            Reply::Json(json!({"prompt_id": prompt_id, "number": number}))
        }
        ("GET", route) if route.starts_with("/history/") => {
            let prompt_id = route.trim_start_matches("/history/").to_string();
            state.history_lookups.lock().unwrap().push(prompt_id.clone());
            let mut found = Map::new();
            if let Some(entry) = state.history.lock().unwrap().get(&prompt_id) {
                found.insert(prompt_id, entry.clone());
            }
            Reply::Json(Value::Object(found))
        }
        ("GET", "/view") => {
            let filename = request.query("filename").unwrap_or_default();
            state.views.lock().unwrap().push(filename.clone());
            Reply::Bytes(format!("render:{filename}").into_bytes())
        }
        _ => {
            respond(&mut stream, 404, "text/plain", b"not found").await;
            return;
        }
    };

    match reply {
        Reply::Json(json) => {
            respond(&mut stream, 200, "application/json", json.to_string().as_bytes()).await
        }
        Reply::Bytes(bytes) => respond(&mut stream, 200, "video/mp4", &bytes).await,
    }
}
