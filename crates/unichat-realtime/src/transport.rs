//! Transport abstraction
//!
//! The registry never talks to a socket directly. Anything that can send a
//! text frame, receive one frame and close itself can sit behind a
//! [`ConnectionHandle`](crate::ConnectionHandle): the axum WebSocket adapter
//! in `unichat-http`, or the in-memory mock used by the test suites.

use async_trait::async_trait;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Classification of a single received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Application data carrying `len` payload bytes
    Data { len: usize },
    /// Ping, pong or other control traffic
    Control,
    /// Close frame or end of stream
    Closed,
}

impl Inbound {
    /// Whether the frame shows the peer is still reading.
    ///
    /// A zero-length data frame is treated like a hang-up.
    pub fn is_sign_of_life(&self) -> bool {
        match self {
            Inbound::Data { len } => *len > 0,
            Inbound::Control => true,
            Inbound::Closed => false,
        }
    }
}

/// A bidirectional, message-framed connection to one client.
///
/// Implementations are not required to be `Sync`; the owning handle
/// serialises every call behind its transport lock.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: &str) -> TransportResult<()>;

    /// Receive and classify the next inbound frame.
    async fn recv(&mut self) -> TransportResult<Inbound>;

    /// Send a normal-closure frame and release the connection.
    async fn close(&mut self) -> TransportResult<()>;

    /// Whether the transport already observed a close from either side.
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_of_life() {
        assert!(Inbound::Data { len: 2 }.is_sign_of_life());
        assert!(Inbound::Control.is_sign_of_life());
        assert!(!Inbound::Data { len: 0 }.is_sign_of_life());
        assert!(!Inbound::Closed.is_sign_of_life());
    }
}
