//! Per-invocation command context.
//!
//! The dispatcher builds one [`CommandContext`] per accepted invocation and
//! drops it once the handler returns. Terminals opened through the context
//! release their typing participation when the context goes away, but
//! output they already queued is still delivered.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bus::{Destination, InboundMessage, UserId};
use crate::channels::Transport;
use crate::error::Result;

use super::registry::{CommandTable, RegistrySnapshot};
use super::terminal::{Terminal, TerminalOptions};
use super::typing::TypingCoordinator;

/// Everything a handler can see and use while it runs.
pub struct CommandContext {
    destination: Destination,
    user: UserId,
    message: Option<InboundMessage>,
    mundane: bool,
    env: Arc<HashMap<String, String>>,
    registry: RegistrySnapshot,
    transport: Arc<dyn Transport>,
    typing: TypingCoordinator,
    max_message_len: usize,
    terminals: Vec<Terminal>,
    dm_destination: Option<Destination>,
}

impl CommandContext {
    pub fn new(
        destination: Destination,
        user: UserId,
        mundane: bool,
        registry: RegistrySnapshot,
        transport: Arc<dyn Transport>,
        typing: TypingCoordinator,
    ) -> Self {
        Self {
            destination,
            user,
            message: None,
            mundane,
            env: Arc::new(HashMap::new()),
            registry,
            transport,
            typing,
            max_message_len: 2000,
            terminals: Vec::new(),
            dm_destination: None,
        }
    }

    /// Attach the message that triggered the invocation.
    pub fn with_message(mut self, message: InboundMessage) -> Self {
        self.message = Some(message);
        self
    }

    /// Set the environment behind [`getvar`](Self::getvar).
    pub fn with_env(mut self, env: Arc<HashMap<String, String>>) -> Self {
        self.env = env;
        self
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Channel the invocation came from.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// User who invoked the command.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn message(&self) -> Option<&InboundMessage> {
        self.message.as_ref()
    }

    /// Whether the bare syntax was used. Terminals inherit this.
    pub fn is_mundane(&self) -> bool {
        self.mundane
    }

    /// Registry as it was when the invocation started.
    pub fn registry(&self) -> &CommandTable {
        &self.registry
    }

    /// Look up an environment variable.
    pub fn getvar(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Terminals opened so far, in order.
    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    /// Open a terminal writing to the invocation's origin.
    pub fn new_terminal(&mut self) -> Terminal {
        self.open_terminal(self.destination.clone(), String::new())
    }

    /// Open a terminal whose code blocks carry `language` (e.g. `diff`).
    /// Mundane invocations still get plain text.
    pub fn terminal_with_language(&mut self, language: impl Into<String>) -> Terminal {
        self.open_terminal(self.destination.clone(), language.into())
    }

    /// Open a terminal writing to the invoking user's private channel,
    /// establishing the channel on first use.
    pub async fn dm_terminal(&mut self) -> Result<Terminal> {
        let destination = match &self.dm_destination {
            Some(dest) => dest.clone(),
            None => {
                let dest = self.transport.private_channel(&self.user).await?;
                debug!(user = %self.user, destination = %dest, "Opened private channel");
                self.dm_destination = Some(dest.clone());
                dest
            }
        };
        Ok(self.open_terminal(destination, String::new()))
    }

    /// Write `text` to a fresh terminal and wait until it is delivered.
    pub async fn reply(&mut self, text: impl AsRef<str>) {
        let term = self.new_terminal();
        term.write(text);
        term.flush().await;
    }

    /// Release typing participation of every terminal this context opened.
    pub fn close(&mut self) {
        for term in &self.terminals {
            term.close();
        }
    }

    fn open_terminal(&mut self, destination: Destination, language: String) -> Terminal {
        let term = Terminal::open(
            destination,
            Arc::clone(&self.transport),
            self.typing.clone(),
            TerminalOptions {
                mundane: self.mundane,
                language,
                max_message_len: self.max_message_len,
            },
        );
        self.terminals.push(term.clone());
        term
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        self.close();
    }
}
