//! Message handler chain.
//!
//! Several collaborators may want to claim an inbound message: the command
//! dispatcher is one, a data-query handler owning a ```` ```sql ```` tag
//! could be another. Each implements [`MessageHandler`]; the
//! [`HandlerChain`] offers every message to its handlers in registration
//! order and stops at the first one that claims it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use chatterm::bus::InboundMessage;
//! use chatterm::error::Result;
//! use chatterm::handlers::{HandlerChain, MessageHandler};
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl MessageHandler for Shout {
//!     fn name(&self) -> &str {
//!         "shout"
//!     }
//!
//!     async fn handle(&self, message: &InboundMessage) -> Result<bool> {
//!         Ok(message.content.ends_with('!'))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut chain = HandlerChain::new();
//! chain.register(Arc::new(Shout));
//! let msg = InboundMessage::new("console", "alice", "general", "hey!");
//! assert_eq!(chain.handle(&msg).await.unwrap(), Some("shout".to_string()));
//! # });
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::bus::InboundMessage;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Something that may claim an inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process `message`. Returns `Ok(true)` when the message was claimed.
    ///
    /// An error means the message was claimed but processing failed; the
    /// handler has already answered the user where appropriate.
    async fn handle(&self, message: &InboundMessage) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Ordered list of message handlers.
#[derive(Default, Clone)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Earlier handlers get the first chance to claim.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        debug!(handler = %handler.name(), "Registered message handler");
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer `message` to each handler in order.
    ///
    /// Returns the name of the handler that claimed it, or `None` when no
    /// handler did. A failing handler ends the chain and its error is
    /// returned.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Option<String>> {
        for handler in &self.handlers {
            match handler.handle(message).await {
                Ok(true) => return Ok(Some(handler.name().to_string())),
                Ok(false) => continue,
                Err(e) => {
                    error!(
                        handler = %handler.name(),
                        destination = %message.chat_id,
                        error = %e,
                        "Message handler failed"
                    );
                    return Err(e);
                }
            }
        }
        debug!(destination = %message.chat_id, "No handler claimed message");
        Ok(None)
    }
}
