//! Message types exchanged with the chat transport.
//!
//! Inbound messages carry what a user typed; outbound messages carry what
//! a terminal delivers. [`Destination`] and [`UserId`] are thin newtypes so
//! chat ids and user ids cannot be mixed up.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a channel that can receive messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a chat user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A message received from a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport name (e.g. "console").
    pub channel: String,
    /// Author of the message.
    pub sender_id: UserId,
    /// Channel the message was posted in.
    pub chat_id: Destination,
    /// Raw message text.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Creates a new inbound message stamped with the current time.
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: UserId::new(sender_id),
            chat_id: Destination::new(chat_id),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A message to be delivered to a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination of the message.
    pub chat_id: Destination,
    /// Fully formatted message text.
    pub content: String,
}

impl OutboundMessage {
    pub fn new(chat_id: Destination, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
        }
    }
}
