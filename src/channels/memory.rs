//! In-memory transport.
//!
//! Keeps every delivered message and the typing indicator state per
//! destination. Used by tests, benchmarks, and embedders that want to
//! inspect traffic instead of sending it anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::bus::{Destination, OutboundMessage, UserId};
use crate::error::Result;

use super::{DeliveryHandle, Transport};

#[derive(Default)]
struct MemoryState {
    sent: Vec<OutboundMessage>,
    typing: HashMap<Destination, bool>,
    typing_refreshes: HashMap<Destination, usize>,
    private_channels: HashMap<UserId, Destination>,
}

/// Transport that records traffic instead of delivering it.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
    send_delay: Option<Duration>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every delivery, which makes ordering bugs observable.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// All delivered messages in delivery order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().sent.clone()
    }

    /// Texts delivered to one destination in delivery order.
    pub fn sent_to(&self, destination: &Destination) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|m| &m.chat_id == destination)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Whether the typing indicator is currently asserted for a destination.
    pub fn is_typing(&self, destination: &Destination) -> bool {
        self.state
            .lock()
            .typing
            .get(destination)
            .copied()
            .unwrap_or(false)
    }

    /// How many times the typing indicator was asserted for a destination.
    pub fn typing_refreshes(&self, destination: &Destination) -> usize {
        self.state
            .lock()
            .typing_refreshes
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Number of private channels opened so far.
    pub fn private_channel_count(&self) -> usize {
        self.state.lock().private_channels.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send_message(&self, destination: &Destination, text: &str) -> Result<DeliveryHandle> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .sent
            .push(OutboundMessage::new(destination.clone(), text));
        Ok(DeliveryHandle {
            destination: destination.clone(),
            message_id,
        })
    }

    async fn private_channel(&self, user: &UserId) -> Result<Destination> {
        let mut state = self.state.lock();
        let dest = state
            .private_channels
            .entry(user.clone())
            .or_insert_with(|| Destination::new(format!("dm-{}", user)));
        Ok(dest.clone())
    }

    async fn start_typing(&self, destination: &Destination) -> Result<()> {
        let mut state = self.state.lock();
        state.typing.insert(destination.clone(), true);
        *state
            .typing_refreshes
            .entry(destination.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn stop_typing(&self, destination: &Destination) -> Result<()> {
        self.state.lock().typing.insert(destination.clone(), false);
        Ok(())
    }
}
