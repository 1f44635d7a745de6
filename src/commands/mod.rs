//! Command system.
//!
//! - [`registry`]: commands keyed by name and alias, loaded and unloaded
//!   per source unit.
//! - [`parser`]: message grammar and shell-style tokenizing.
//! - [`dispatcher`]: turns messages into invocations and applies the
//!   error policy.
//! - [`terminal`] and [`context`]: what a running handler writes to.
//! - [`typing`]: shared, reference-counted typing indicator per destination.
//! - [`loader`] and [`watcher`]: unit files on disk and their live reload.

pub mod builtin;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod terminal;
pub mod typing;
pub mod watcher;

pub use builtin::{builtin_commands, BUILTIN_UNIT};
pub use context::CommandContext;
pub use descriptor::{CommandBuilder, CommandDescriptor, CommandHandler, FnHandler, Metadata};
pub use dispatcher::{Dispatch, Dispatcher};
pub use loader::{CommandAction, CommandDef, UnitLoader, UnitManifest};
pub use parser::{codify, tokenize, CommandLine, Grammar, ParsedMessage};
pub use registry::{CommandRegistry, CommandTable, LoadPolicy, LoadReport, RegistrySnapshot};
pub use terminal::{Terminal, TerminalOptions};
pub use typing::{ParticipantId, TypingCoordinator};
pub use watcher::{ModuleWatcher, Reaction, WatchEvent, WatchEventKind, WatcherState};
