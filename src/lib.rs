//! Chatterm - hot-reloadable command dispatcher for chat bots

pub mod bus;
pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;

pub use commands::{CommandRegistry, Dispatcher};
pub use config::Config;
pub use error::{ChattermError, CommandError, Result};
