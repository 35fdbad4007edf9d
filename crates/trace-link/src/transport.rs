use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::error::{LinkError, LinkErrorKind};

/// One frame read from an open connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Bytes arrived that cannot be a text frame.
    Malformed(String),
    /// The connection ended. `clean` is true only when the peer completed a
    /// close handshake.
    Closed { clean: bool, reason: Option<String> },
}

/// Opens connections to the trace server.
#[async_trait]
pub trait TraceTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TraceConnection>, LinkError>;
}

/// A single open connection. Owned exclusively by the connection driver.
#[async_trait]
pub trait TraceConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), LinkError>;

    /// Next frame from the peer. Must be cancel-safe: the driver may drop the
    /// returned future and call again.
    async fn next_frame(&mut self) -> InboundFrame;

    async fn close(&mut self);
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TraceTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn TraceConnection>, LinkError> {
        let (stream, _response) = connect_async(self.url.as_str()).await.map_err(|err| {
            LinkError::new(LinkErrorKind::ConnectFailed)
                .with_hint(err.to_string())
                .retriable(true)
        })?;
        info!(target: "trace-link", url = %self.url, "websocket connected");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TraceConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        self.stream.send(Message::Text(text)).await.map_err(|err| {
            LinkError::new(LinkErrorKind::Closed)
                .with_hint(err.to_string())
                .retriable(true)
        })
    }

    async fn next_frame(&mut self) -> InboundFrame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return InboundFrame::Text(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return match String::from_utf8(bytes) {
                        Ok(text) => InboundFrame::Text(text),
                        Err(_) => InboundFrame::Malformed("binary frame is not utf-8".into()),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return InboundFrame::Closed {
                        clean: true,
                        reason: frame
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty()),
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(err)) => {
                    return InboundFrame::Closed {
                        clean: false,
                        reason: Some(err.to_string()),
                    }
                }
                None => {
                    return InboundFrame::Closed {
                        clean: false,
                        reason: Some("stream ended without close frame".into()),
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(target: "trace-link", ?err, "websocket close failed");
        }
    }
}
