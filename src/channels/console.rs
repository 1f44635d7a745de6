//! Console transport for the interactive CLI.
//!
//! Every destination is printed to stdout with a `[destination]` prefix.
//! Typing indicators are only logged.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bus::{Destination, UserId};
use crate::error::Result;

use super::{DeliveryHandle, Transport};

/// Transport writing to the process's standard output.
pub struct ConsoleTransport {
    stdout: Mutex<tokio::io::Stdout>,
    next_id: AtomicU64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_message(&self, destination: &Destination, text: &str) -> Result<DeliveryHandle> {
        let mut out = self.stdout.lock().await;
        for line in text.lines() {
            out.write_all(format!("[{}] {}\n", destination, line).as_bytes())
                .await?;
        }
        out.flush().await?;
        Ok(DeliveryHandle {
            destination: destination.clone(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn private_channel(&self, user: &UserId) -> Result<Destination> {
        Ok(Destination::new(format!("dm-{}", user)))
    }

    async fn start_typing(&self, destination: &Destination) -> Result<()> {
        debug!(destination = %destination, "typing");
        Ok(())
    }

    async fn stop_typing(&self, destination: &Destination) -> Result<()> {
        debug!(destination = %destination, "stopped typing");
        Ok(())
    }
}
