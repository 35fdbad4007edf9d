//! In-process transport. Each connect attempt hands a [`ServerEnd`] to the
//! [`ChannelListener`], which plays the server side. Used by tests and by
//! embedders that want to replay recorded streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use routewatch_core_types::{RunRequest, TraceEvent};
use tokio::sync::mpsc;

use crate::error::{LinkError, LinkErrorKind};
use crate::transport::{InboundFrame, TraceConnection, TraceTransport};

/// Frame pushed from the server side to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    Text(String),
    Close { clean: bool },
}

#[derive(Debug)]
pub struct ChannelTransport {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    reachable: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, ChannelListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accept_tx,
            reachable: AtomicBool::new(true),
            attempts: Mutex::new(Vec::new()),
        });
        (transport, ChannelListener { accept_rx })
    }

    /// While unreachable every connect attempt fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Start time of every connect attempt so far.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl TraceTransport for ChannelTransport {
    async fn connect(&self) -> Result<Box<dyn TraceConnection>, LinkError> {
        self.attempts.lock().push(Instant::now());
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LinkError::new(LinkErrorKind::ConnectFailed)
                .with_hint("peer unreachable")
                .retriable(true));
        }
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.accept_tx
            .send(ServerEnd {
                requests: request_rx,
                frames: frame_tx,
            })
            .map_err(|_| {
                LinkError::new(LinkErrorKind::ConnectFailed).with_hint("listener dropped")
            })?;
        Ok(Box::new(ChannelConnection {
            requests: request_tx,
            frames: frame_rx,
        }))
    }
}

#[derive(Debug)]
pub struct ChannelListener {
    accept_rx: mpsc::UnboundedReceiver<ServerEnd>,
}

impl ChannelListener {
    /// Next accepted connection, or `None` once the transport is dropped.
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accept_rx.recv().await
    }
}

/// Server half of one in-process connection.
#[derive(Debug)]
pub struct ServerEnd {
    requests: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<ServerFrame>,
}

impl ServerEnd {
    /// Next raw text written by the client; `None` once the client is gone.
    pub async fn next_raw(&mut self) -> Option<String> {
        self.requests.recv().await
    }

    /// Next run request written by the client. Text that is not a request is
    /// skipped.
    pub async fn next_request(&mut self) -> Option<RunRequest> {
        loop {
            let raw = self.next_raw().await?;
            if let Ok(request) = serde_json::from_str(&raw) {
                return Some(request);
            }
        }
    }

    /// Returns false when the client side is gone.
    pub fn emit(&self, event: &TraceEvent) -> bool {
        self.emit_raw(event.encode())
    }

    pub fn emit_raw(&self, text: impl Into<String>) -> bool {
        self.frames.send(ServerFrame::Text(text.into())).is_ok()
    }

    pub fn close(self, clean: bool) {
        let _ = self.frames.send(ServerFrame::Close { clean });
    }

    /// True once the client dropped its half.
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

#[derive(Debug)]
struct ChannelConnection {
    requests: mpsc::UnboundedSender<String>,
    frames: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl TraceConnection for ChannelConnection {
    async fn send_text(&mut self, text: String) -> Result<(), LinkError> {
        self.requests.send(text).map_err(|_| {
            LinkError::new(LinkErrorKind::Closed)
                .with_hint("server end dropped")
                .retriable(true)
        })
    }

    async fn next_frame(&mut self) -> InboundFrame {
        match self.frames.recv().await {
            Some(ServerFrame::Text(text)) => InboundFrame::Text(text),
            Some(ServerFrame::Close { clean }) => InboundFrame::Closed {
                clean,
                reason: None,
            },
            None => InboundFrame::Closed {
                clean: false,
                reason: Some("server end dropped".into()),
            },
        }
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}
