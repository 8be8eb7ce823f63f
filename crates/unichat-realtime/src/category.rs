//! Event categories
//!
//! A category is a named namespace of events with its own subscriber
//! population. Each category declares its closed set of event names as an
//! enum so senders cannot misspell them.

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt, sync::Arc};

use crate::envelope::EventName;

/// Interned category name used as the outer registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryName(Arc<str>);

impl CategoryName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CategoryName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CategoryName {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for CategoryName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for CategoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named event namespace with a closed set of events.
pub trait EventCategory: Send + Sync + 'static {
    /// Name clients subscribe under.
    const NAME: &'static str;

    /// Events that can be sent in this category.
    type Event: EventName + Copy + Send + Sync + 'static;

    fn category_name() -> CategoryName {
        CategoryName::from(Self::NAME)
    }
}

/// Conversation lifecycle and message notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversation;

impl EventCategory for Conversation {
    const NAME: &'static str = "Conversation";
    type Event = ConversationEvent;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationEvent {
    NewMessage,
    MessageUnsent,
    ConversationOpened,
    ConversationClosed,
}

impl ConversationEvent {
    pub const ALL: [ConversationEvent; 4] = [
        ConversationEvent::NewMessage,
        ConversationEvent::MessageUnsent,
        ConversationEvent::ConversationOpened,
        ConversationEvent::ConversationClosed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ConversationEvent::NewMessage => "NewMessage",
            ConversationEvent::MessageUnsent => "MessageUnsent",
            ConversationEvent::ConversationOpened => "ConversationOpened",
            ConversationEvent::ConversationClosed => "ConversationClosed",
        }
    }
}

impl EventName for ConversationEvent {
    fn name(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
