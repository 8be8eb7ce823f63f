//! Wire envelope
//!
//! Every frame pushed to a client is a JSON object with exactly two keys:
//!
//! ```json
//! {"Event": "NewMessage", "Data": {"id": 1}}
//! ```
//!
//! `Data` is `null` when an event carries no payload.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialised frame shared by every recipient of one send.
pub type Frame = Arc<str>;

/// Heartbeat written by the liveness probe.
pub const HEARTBEAT_FRAME: &str = r#"{"Event":"IsAlive","Data":null}"#;

/// Anything that names an event on the wire.
pub trait EventName {
    fn name(&self) -> &str;
}

impl EventName for str {
    fn name(&self) -> &str {
        self
    }
}

impl EventName for String {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl<E: EventName + ?Sized> EventName for &E {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Events emitted by the realtime core itself rather than by a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    IsAlive,
}

impl EventName for SystemEvent {
    fn name(&self) -> &str {
        match self {
            SystemEvent::IsAlive => "IsAlive",
        }
    }
}

/// Outbound notification envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<'a, T> {
    pub event: &'a str,
    pub data: Option<&'a T>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn new(event: &'a str, data: Option<&'a T>) -> Self {
        Self { event, data }
    }

    /// Serialise once into a frame that can be shared across deliveries.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

/// Decoded envelope, as seen by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReceivedEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ReceivedEnvelope {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
