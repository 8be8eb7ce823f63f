//! In-memory transport for tests
//!
//! [`mock_pair`] returns a [`MockTransport`] to hand to the registry and a
//! [`MockPeer`] that plays the client: it reads what the server sent,
//! answers heartbeats, hangs up, or makes sends stall or fail.

use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::transport::{Inbound, Transport, TransportError, TransportResult};

#[derive(Debug, Default)]
struct MockBehavior {
    hang_sends: AtomicBool,
    fail_sends: AtomicBool,
    auto_reply: AtomicBool,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

/// Server side of a mock connection.
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    behavior: Arc<MockBehavior>,
}

/// Client side of a mock connection.
pub struct MockPeer {
    frames: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    behavior: Arc<MockBehavior>,
}

pub fn mock_pair() -> (MockTransport, MockPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let behavior = Arc::new(MockBehavior::default());

    (
        MockTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
            behavior: Arc::clone(&behavior),
        },
        MockPeer {
            frames: outbound_rx,
            inbound: Some(inbound_tx),
            behavior,
        },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: &str) -> TransportResult<()> {
        if self.behavior.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.behavior.hang_sends.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_sends.load(Ordering::Acquire) {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> TransportResult<Inbound> {
        if self.behavior.auto_reply.load(Ordering::Acquire) {
            return Ok(Inbound::Data { len: 2 });
        }
        match self.inbound.recv().await {
            Some(Inbound::Closed) | None => {
                self.behavior.closed.store(true, Ordering::Release);
                Ok(Inbound::Closed)
            }
            Some(frame) => Ok(frame),
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.behavior.close_calls.fetch_add(1, Ordering::AcqRel);
        self.behavior.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.behavior.closed.load(Ordering::Acquire)
    }
}

impl MockPeer {
    /// Wait up to `wait` for the next frame the server sent.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take every frame that has already arrived.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Answer every future receive immediately, like a live client.
    pub fn auto_reply(&self) {
        self.behavior.auto_reply.store(true, Ordering::Release);
    }

    /// Queue one inbound frame for the server to read.
    pub fn reply(&self, frame: Inbound) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(frame);
        }
    }

    /// Drop the inbound side so the server observes end of stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every future send block forever.
    pub fn hang_sends(&self) {
        self.behavior.hang_sends.store(true, Ordering::Release);
    }

    /// Make every future send fail with an I/O error.
    pub fn fail_sends(&self) {
        self.behavior.fail_sends.store(true, Ordering::Release);
    }

    /// Number of times the server called `close`.
    pub fn close_calls(&self) -> usize {
        self.behavior.close_calls.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.behavior.closed.load(Ordering::Acquire)
    }
}
