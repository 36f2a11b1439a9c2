//! [`Transport`] implementation over a real Axum WebSocket.
//!
//! Outbound frames are queued onto an unbounded channel drained by a
//! dedicated writer task, rather than sent directly from `send_text`/
//! `send_binary`. This lets `buffered_amount()` report actual queue depth
//! (bytes enqueued but not yet handed to the socket) for the backpressure
//! decisions in [`crate::session::Session::send_pcm`], and keeps a single
//! writer owning the sink half so callers never need to serialize sends
//! themselves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream, StreamExt};
use futures::SinkExt;
use tokio::sync::mpsc;

use crate::error::SendspinError;
use crate::transport::Transport;

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close(u16, String),
}

impl Outbound {
    fn byte_len(&self) -> usize {
        match self {
            Outbound::Text(s) => s.len(),
            Outbound::Binary(b) => b.len(),
            Outbound::Close(..) => 0,
        }
    }
}

/// Adapts an Axum [`WebSocket`] to the [`Transport`] trait [`Session`](crate::session::Session)
/// depends on.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    queued_bytes: Arc<AtomicUsize>,
}

impl WsTransport {
    /// Splits `socket`, spawns the writer task, and returns the transport
    /// along with the read half for the caller's own receive loop.
    pub fn new(socket: WebSocket) -> (Self, SplitStream<WebSocket>) {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let queued_bytes = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_writer(sink, rx, open.clone(), queued_bytes.clone()));

        (
            Self {
                tx,
                open,
                queued_bytes,
            },
            stream,
        )
    }
}

async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    queued_bytes: Arc<AtomicUsize>,
) {
    while let Some(frame) = rx.recv().await {
        let len = frame.byte_len();
        let result = match frame {
            Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
            Outbound::Binary(data) => sink.send(Message::Binary(data.into())).await,
            Outbound::Close(code, reason) => {
                let _ = sink
                    .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                open.store(false, Ordering::SeqCst);
                break;
            }
        };
        queued_bytes.fetch_sub(len, Ordering::SeqCst);
        if result.is_err() {
            open.store(false, Ordering::SeqCst);
            break;
        }
    }
    open.store(false, Ordering::SeqCst);
}

#[async_trait]
impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn buffered_amount(&self) -> usize {
        self.queued_bytes.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), SendspinError> {
        if !self.is_open() {
            return Err(SendspinError::Transport("closed".into()));
        }
        self.queued_bytes.fetch_add(text.len(), Ordering::SeqCst);
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| SendspinError::Transport("writer task gone".into()))
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendspinError> {
        if !self.is_open() {
            return Err(SendspinError::Transport("closed".into()));
        }
        self.queued_bytes.fetch_add(data.len(), Ordering::SeqCst);
        self.tx
            .send(Outbound::Binary(data))
            .map_err(|_| SendspinError::Transport("writer task gone".into()))
    }

    async fn close(&self, code: u16, reason: String) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.tx.send(Outbound::Close(code, reason));
    }
}
