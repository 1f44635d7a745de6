//! Terminals: per-invocation output sinks.
//!
//! A terminal is bound to one destination. `write` appends to the local
//! content immediately and queues the increment for delivery; a background
//! task per terminal delivers increments one at a time, so writes from one
//! terminal arrive in program order while the caller never waits on the
//! network. Deliveries already queued complete even after the terminal
//! (and its command context) is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Destination;
use crate::channels::Transport;

use super::parser::{chunk_message, codify, fence_overhead};
use super::typing::TypingCoordinator;

enum Delivery {
    Text(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypingState {
    Idle,
    Active,
    Released,
}

/// How a terminal formats and sizes its output.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Deliver raw text instead of code blocks.
    pub mundane: bool,
    /// Language tag of the code block.
    pub language: String,
    /// Longest message the transport accepts, formatting included.
    pub max_message_len: usize,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            mundane: false,
            language: String::new(),
            max_message_len: 2000,
        }
    }
}

struct TerminalInner {
    id: Uuid,
    destination: Destination,
    mundane: bool,
    content: Mutex<String>,
    queue: mpsc::UnboundedSender<Delivery>,
    typing: Mutex<TypingState>,
    coordinator: TypingCoordinator,
}

/// Output sink bound to one destination. Cheap to clone; clones share
/// content and typing participation.
#[derive(Clone)]
pub struct Terminal {
    inner: Arc<TerminalInner>,
}

impl Terminal {
    /// Open a terminal and start its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        destination: Destination,
        transport: Arc<dyn Transport>,
        coordinator: TypingCoordinator,
        options: TerminalOptions,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let budget = if options.mundane {
            options.max_message_len
        } else {
            options
                .max_message_len
                .saturating_sub(fence_overhead(&options.language))
        };

        tokio::spawn(deliver(
            transport,
            destination.clone(),
            rx,
            options.mundane,
            options.language,
            budget,
        ));

        let id = Uuid::new_v4();
        debug!(terminal = %id, destination = %destination, "Opened terminal");

        Self {
            inner: Arc::new(TerminalInner {
                id,
                destination,
                mundane: options.mundane,
                content: Mutex::new(String::new()),
                queue,
                typing: Mutex::new(TypingState::Idle),
                coordinator,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    pub fn is_mundane(&self) -> bool {
        self.inner.mundane
    }

    /// Everything written so far.
    pub fn content(&self) -> String {
        self.inner.content.lock().clone()
    }

    /// Append `text` and queue it for delivery. Never blocks.
    pub fn write(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        self.inner.content.lock().push_str(text);
        if text.is_empty() {
            return;
        }
        if self.inner.queue.send(Delivery::Text(text.to_string())).is_err() {
            warn!(terminal = %self.inner.id, "Delivery task gone, dropping output");
        }
    }

    /// Wait until every write issued so far has been handed to the transport.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.queue.send(Delivery::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Take part in the destination's typing indicator.
    ///
    /// Returns `false` when this terminal already gave up typing; open a
    /// new terminal instead.
    pub fn start_typing(&self) -> bool {
        let mut state = self.inner.typing.lock();
        match *state {
            TypingState::Idle => {
                self.inner
                    .coordinator
                    .start(&self.inner.destination, self.inner.id);
                *state = TypingState::Active;
                true
            }
            TypingState::Active => true,
            TypingState::Released => {
                warn!(terminal = %self.inner.id, "Terminal cannot resume typing");
                false
            }
        }
    }

    /// Stop taking part in the typing indicator. The terminal cannot type
    /// again afterwards.
    pub fn stop_typing(&self) {
        let mut state = self.inner.typing.lock();
        if *state == TypingState::Active {
            self.inner
                .coordinator
                .stop(&self.inner.destination, self.inner.id);
        }
        *state = TypingState::Released;
    }

    /// Whether this terminal currently holds the typing indicator.
    pub fn is_typing(&self) -> bool {
        *self.inner.typing.lock() == TypingState::Active
    }

    /// Release typing participation for good. Idempotent; queued output is
    /// still delivered.
    pub fn close(&self) {
        self.stop_typing();
        debug!(terminal = %self.inner.id, "Closed terminal");
    }
}

impl Drop for TerminalInner {
    fn drop(&mut self) {
        if *self.typing.get_mut() == TypingState::Active {
            self.coordinator.stop(&self.destination, self.id);
        }
    }
}

async fn deliver(
    transport: Arc<dyn Transport>,
    destination: Destination,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mundane: bool,
    language: String,
    budget: usize,
) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Text(text) => {
                for chunk in chunk_message(&text, budget) {
                    let formatted = codify(&chunk, mundane, &language);
                    match transport.send_message(&destination, &formatted).await {
                        Ok(handle) => {
                            debug!(destination = %destination, message_id = handle.message_id, "Sent message")
                        }
                        Err(e) => {
                            warn!(destination = %destination, error = %e, "Failed to deliver terminal output")
                        }
                    }
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryTransport;
    use std::time::Duration;

    fn setup(transport: MemoryTransport) -> (Arc<MemoryTransport>, TypingCoordinator) {
        let transport = Arc::new(transport);
        let coordinator = TypingCoordinator::new(transport.clone(), Duration::from_millis(40));
        (transport, coordinator)
    }

    fn open(
        transport: &Arc<MemoryTransport>,
        coordinator: &TypingCoordinator,
        options: TerminalOptions,
    ) -> Terminal {
        Terminal::open(
            Destination::from("general"),
            transport.clone(),
            coordinator.clone(),
            options,
        )
    }

    fn mundane() -> TerminalOptions {
        TerminalOptions {
            mundane: true,
            ..TerminalOptions::default()
        }
    }

    #[tokio::test]
    async fn test_writes_are_delivered_in_order() {
        let (transport, coordinator) =
            setup(MemoryTransport::new().with_send_delay(Duration::from_millis(5)));
        let term = open(&transport, &coordinator, mundane());

        term.write("a");
        term.write("b");
        assert_eq!(term.content(), "ab");

        term.flush().await;
        assert_eq!(transport.sent_to(term.destination()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_write_is_synchronously_visible() {
        let (transport, coordinator) =
            setup(MemoryTransport::new().with_send_delay(Duration::from_millis(50)));
        let term = open(&transport, &coordinator, mundane());

        term.write("hello");
        assert_eq!(term.content(), "hello");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fenced_output_is_codified() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let term = open(&transport, &coordinator, TerminalOptions::default());

        term.write("total 0");
        term.flush().await;
        assert_eq!(transport.sent_to(term.destination()), vec!["```\ntotal 0\n```"]);
    }

    #[tokio::test]
    async fn test_long_output_is_split() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let options = TerminalOptions {
            max_message_len: 20,
            ..TerminalOptions::default()
        };
        let term = open(&transport, &coordinator, options);

        term.write("line one\nline two\nline three");
        term.flush().await;

        let sent = transport.sent_to(term.destination());
        assert!(sent.len() > 1);
        for message in &sent {
            assert!(message.chars().count() <= 20, "too long: {:?}", message);
            assert!(message.starts_with("```\n"));
        }
    }

    #[tokio::test]
    async fn test_empty_write_is_not_delivered() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let term = open(&transport, &coordinator, mundane());

        term.write("");
        term.flush().await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_outlives_terminal() {
        let (transport, coordinator) =
            setup(MemoryTransport::new().with_send_delay(Duration::from_millis(10)));
        let dest = Destination::from("general");
        {
            let term = open(&transport, &coordinator, mundane());
            term.write("one");
            term.write("two");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.sent_to(&dest), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_typing_lifecycle() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let term = open(&transport, &coordinator, mundane());

        assert!(term.start_typing());
        assert!(term.is_typing());
        assert!(coordinator.is_active(term.destination()));

        term.stop_typing();
        assert!(!term.is_typing());
        assert!(!coordinator.is_active(term.destination()));

        // Not reusable once stopped
        assert!(!term.start_typing());
        assert!(!coordinator.is_active(term.destination()));
    }

    #[tokio::test]
    async fn test_close_releases_typing_and_is_idempotent() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let first = open(&transport, &coordinator, mundane());
        let second = open(&transport, &coordinator, mundane());

        first.start_typing();
        second.start_typing();
        assert_eq!(coordinator.participant_count(first.destination()), 2);

        first.close();
        first.close();
        assert!(coordinator.is_active(first.destination()));
        assert_eq!(coordinator.participant_count(first.destination()), 1);

        second.close();
        assert!(!coordinator.is_active(second.destination()));
    }

    #[tokio::test]
    async fn test_closed_idle_terminal_cannot_type() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let term = open(&transport, &coordinator, mundane());

        term.close();
        assert!(!term.start_typing());
        assert!(!term.is_typing());
        assert!(!coordinator.is_active(term.destination()));
    }

    #[tokio::test]
    async fn test_drop_releases_typing() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let dest = Destination::from("general");
        {
            let term = open(&transport, &coordinator, mundane());
            let clone = term.clone();
            term.start_typing();
            drop(term);
            // Clone still alive
            assert!(coordinator.is_active(&dest));
            drop(clone);
        }
        assert!(!coordinator.is_active(&dest));
    }

    #[tokio::test]
    async fn test_writes_after_close_are_delivered() {
        let (transport, coordinator) = setup(MemoryTransport::new());
        let term = open(&transport, &coordinator, mundane());
        term.close();
        term.write("late");
        term.flush().await;
        assert_eq!(transport.sent_to(term.destination()), vec!["late"]);
    }
}
