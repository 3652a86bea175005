//! WebSocket connection to a ComfyUI server.
//!
//! ComfyUI routes a prompt's events to the socket registered under the
//! client id that queued it, so [`ComfyUIClient`] pins one id for its
//! whole life and every (re)connect presents it.

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    #[error("Connection error: {0}")]
    Connection(String),
}

pub struct ComfyUIClient {
    client_id: String,
    ws_url: String,
    api_url: String,
}

/// An open socket and the id it was opened under.
#[derive(Debug)]
pub struct ComfyUIConnection {
    pub client_id: String,
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// New client with a random id. URLs are bases such as
    /// `ws://host:8190` and `http://host:8190`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self::with_client_id(uuid::Uuid::new_v4().to_string(), ws_url, api_url)
    }

    pub fn with_client_id(client_id: String, ws_url: String, api_url: String) -> Self {
        Self {
            client_id,
            ws_url,
            api_url,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Handshake URL: `{ws_url}/ws?clientId={client_id}`.
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let (ws_stream, _) = connect_async(self.endpoint()).await.map_err(|e| {
            ComfyUIClientError::Connection(format!("{}: {e}", self.ws_url))
        })?;

        tracing::info!(client_id = %self.client_id, url = %self.ws_url, "ComfyUI socket open");
        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}
