//! Error types for the realtime core.

use thiserror::Error;

use crate::ids::SlotKey;
use crate::transport::TransportError;

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The greeting could not be written, so the connection never became a
    /// subscriber.
    #[error("Greeting to {key} failed: {source}")]
    GreetingFailed {
        key: SlotKey,
        #[source]
        source: TransportError,
    },

    #[error("Registry is shutting down")]
    ShuttingDown,
}

impl RealtimeError {
    /// Stable machine-readable code, attached to rejection logs.
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::GreetingFailed { .. } => "GREETING_FAILED",
            RealtimeError::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}
