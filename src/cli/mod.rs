//! Subcommands of the `chatterm` binary.

pub(crate) mod check;
pub(crate) mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};

use chatterm::commands::{builtin_commands, CommandRegistry, BUILTIN_UNIT};
use chatterm::config::Config;

/// Load the config file (or the default one) and apply CLI overrides.
pub(crate) fn load_config(path: Option<PathBuf>, commands: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    if let Some(dir) = commands {
        config.commands.dir = dir;
    }
    Ok(config)
}

/// Registry holding the built-in commands.
pub(crate) fn builtin_registry() -> Result<CommandRegistry> {
    let registry = CommandRegistry::new();
    registry
        .load(BUILTIN_UNIT, builtin_commands())
        .context("Failed to register built-in commands")?;
    Ok(registry)
}
