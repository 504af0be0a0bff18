//! Duplex transport seam and its WebSocket implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::SocketError;

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SocketError>;
}

/// An open text-frame duplex channel.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, SocketError>>;

    async fn close(&mut self);
}

/// Connects with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SocketError> {
        let (stream, _resp) =
            connect_async(url)
                .await
                .map_err(|e| SocketError::ConnectFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, SocketError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                // Undecodable bytes surface as a malformed frame, not a
                // transport failure.
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite on the next read/write.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(SocketError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error closing WebSocket");
        }
    }
}
