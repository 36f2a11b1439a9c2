//! Transport abstraction decoupling [`crate::session::Session`] from a
//! concrete socket implementation.
//!
//! The server-side Axum WebSocket adapter lives in [`crate::api`]; tests use
//! [`InMemoryTransport`] so session logic can run without a real socket.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::SendspinError;

/// A duplex message transport: text/binary sends, an open/closed flag, and
/// a buffered-bytes gauge for backpressure decisions.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Approximate bytes queued for send but not yet flushed to the peer.
    fn buffered_amount(&self) -> usize;

    async fn send_text(&self, text: String) -> Result<(), SendspinError>;

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendspinError>;

    async fn close(&self, code: u16, reason: String);
}

/// In-memory transport for unit tests: records every outbound frame and lets
/// tests control `is_open`/`buffered_amount`.
#[derive(Default)]
pub struct InMemoryTransport {
    open: AtomicBool,
    buffered: AtomicUsize,
    sent_text: Mutex<Vec<String>>,
    sent_binary: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<Option<(u16, String)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_buffered_amount(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent_text.lock().unwrap().clone()
    }

    pub fn sent_binary(&self) -> Vec<Vec<u8>> {
        self.sent_binary.lock().unwrap().clone()
    }

    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), SendspinError> {
        if !self.is_open() {
            return Err(SendspinError::Transport("closed".into()));
        }
        self.sent_text.lock().unwrap().push(text);
        Ok(())
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendspinError> {
        if !self.is_open() {
            return Err(SendspinError::Transport("closed".into()));
        }
        self.sent_binary.lock().unwrap().push(data);
        Ok(())
    }

    async fn close(&self, code: u16, reason: String) {
        self.open.store(false, Ordering::SeqCst);
        *self.closed.lock().unwrap() = Some((code, reason));
    }
}
