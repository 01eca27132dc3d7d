//! WebSocket endpoint of a ComfyUI server.
//!
//! The server pushes progress and completion notifications to
//! `/ws?clientId=<id>`; only prompts queued with the same client id are
//! reported to that socket.

use futures::{FutureExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and as whom to connect. Holds no socket itself.
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

/// An open notification socket.
pub struct ComfyUIConnection {
    pub client_id: String,
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIConnection {
    /// Consume whatever frames are already buffered, without waiting, and
    /// report whether the socket is still usable.
    ///
    /// Between prompts nothing pending is relevant, so leftover frames are
    /// discarded. A close frame, end of stream or read error means the
    /// server has gone away and the connection must be replaced.
    pub fn drain_pending(&mut self) -> bool {
        while let Some(next) = self.ws_stream.next().now_or_never() {
            match next {
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "ComfyUI closed the idle WebSocket");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Idle WebSocket failed");
                    return false;
                }
                None => return false,
            }
        }
        true
    }
}

impl ComfyUIClient {
    /// `ws_url` is the socket root, e.g. `ws://host:8188`.
    pub fn new(ws_url: String, client_id: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            client_id,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// `{ws_url}/ws?clientId={client_id}`
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    /// Open a new socket. Each call performs a fresh handshake.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let (ws_stream, _) = connect_async(self.endpoint()).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            ws_url = %self.ws_url,
            "Connected to ComfyUI WebSocket",
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// The handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A read failed on an open socket.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket closed before the job finished")]
    Closed,
}
