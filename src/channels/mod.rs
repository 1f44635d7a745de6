//! Chat transport abstraction.
//!
//! The dispatcher never talks to a chat platform directly. Everything it
//! needs (sending text, opening a private channel, asserting the typing
//! indicator) goes through the [`Transport`] trait, so platforms can be
//! swapped and tests can record traffic.
//!
//! - [`MemoryTransport`] records deliveries and typing state in memory.
//! - [`ConsoleTransport`] prints deliveries to stdout for the CLI.

pub mod console;
pub mod memory;

use async_trait::async_trait;

use crate::bus::{Destination, UserId};
use crate::error::Result;

pub use console::ConsoleTransport;
pub use memory::MemoryTransport;

/// Receipt for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHandle {
    /// Where the message went.
    pub destination: Destination,
    /// Transport-assigned message id.
    pub message_id: u64,
}

/// Capability to reach a chat platform.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`) and safe
/// to call from many tasks at once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the transport name used in logs.
    fn name(&self) -> &str;

    /// Delivers one fully formatted message.
    async fn send_message(&self, destination: &Destination, text: &str) -> Result<DeliveryHandle>;

    /// Returns the user's private channel, creating it when absent.
    async fn private_channel(&self, user: &UserId) -> Result<Destination>;

    /// Asserts (or refreshes) the typing indicator for a destination.
    ///
    /// Platforms expire the indicator after a few seconds, so callers
    /// re-send it periodically while output is being produced.
    async fn start_typing(&self, destination: &Destination) -> Result<()>;

    /// Deasserts the typing indicator. Platforms without an explicit
    /// "stop" simply let it expire.
    async fn stop_typing(&self, _destination: &Destination) -> Result<()> {
        Ok(())
    }
}
