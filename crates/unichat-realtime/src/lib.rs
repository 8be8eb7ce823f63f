//! # UniChat Realtime
//!
//! Server-side registry of live subscriber connections and the fan-out of
//! application events to them.
//!
//! Clients subscribe under a *category* (for example `Conversation`),
//! optionally narrowed to one *entity* such as a single conversation id.
//! Domain code publishes typed events to a set of users within a category
//! and scope, and the registry pushes a small JSON envelope to every
//! matching connection without waiting on any of them.
//!
//! ## Core pieces
//!
//! - **[`ConnectionRegistry`]**: concurrent `category -> scope -> user -> handle` map
//! - **[`ConnectionHandle`]**: one greeted transport with serialised access
//!   and idempotent disposal
//! - **[`DispatchContext`]**: typed facade that only accepts the events of
//!   its category
//! - **[`LivenessProbe`]**: periodic heartbeat sweep that evicts dead peers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::{collections::HashSet, sync::Arc};
//! use unichat_realtime::{
//!     Conversation, ConversationEvent, ConnectionRegistry, EntityScope, UserId,
//! };
//!
//! let registry = Arc::new(ConnectionRegistry::default());
//! registry
//!     .register("Conversation", EntityScope::Entity(42), UserId::new(7), transport)
//!     .await?;
//!
//! let recipients: HashSet<UserId> = [UserId::new(7)].into();
//! registry
//!     .context::<Conversation>(Some(UserId::new(3)))
//!     .send_to_users(EntityScope::Entity(42), &recipients, ConversationEvent::NewMessage, Some(&message));
//! ```

pub mod category;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod ids;
pub mod liveness;
pub mod registry;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use category::{CategoryName, Conversation, ConversationEvent, EventCategory};
pub use config::{DEFAULT_GREETING, RealtimeConfig, RealtimeConfigBuilder, RealtimeConfigError};
pub use dispatch::DispatchContext;
pub use envelope::{Envelope, EventName, Frame, HEARTBEAT_FRAME, ReceivedEnvelope, SystemEvent};
pub use error::{RealtimeError, RealtimeResult};
pub use handle::{CloseReason, ConnectionHandle, ProbeOutcome, TransportGuard};
pub use ids::{EntityScope, NO_ENTITY, SlotKey, UserId};
pub use liveness::{LivenessProbe, SweepPhase, SweepReport};
pub use registry::{ConnectionRegistry, RegistryStats, SweepVerdict};
pub use transport::{Inbound, Transport, TransportError, TransportResult};
