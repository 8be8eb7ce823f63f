//! UniChat realtime notification server.
//!
//! Facade over the workspace crates: [`realtime`] holds the connection
//! registry and event fan-out, [`http`] exposes it over axum WebSockets.

pub use unichat_http as http;
pub use unichat_realtime as realtime;

pub use unichat_http::{RealtimeServer, ServerConfig, ServerConfigBuilder, serve};
pub use unichat_realtime::{
    ConnectionRegistry, Conversation, ConversationEvent, DispatchContext, EntityScope,
    LivenessProbe, RealtimeConfig, UserId,
};
