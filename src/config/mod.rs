//! Configuration for Chatterm
//!
//! Configuration is read from `~/.chatterm/config.json` (or an explicit
//! path). A missing file yields defaults. Environment variables, optionally
//! loaded from a `.env` file, override individual fields after the file is
//! read:
//!
//! | Variable                     | Field                    |
//! |------------------------------|--------------------------|
//! | `CHATTERM_COMMANDS_DIR`      | `commands.dir`           |
//! | `CHATTERM_WATCH`             | `commands.watch`         |
//! | `CHATTERM_SHELL_NAME`        | `dispatch.shell_name`    |
//! | `CHATTERM_TYPING_REFRESH_MS` | `typing.refresh_ms`      |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ChattermError, Result};

/// Shortest message length that still fits a fenced block with content.
const MIN_MESSAGE_LEN: usize = 16;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where command units live and how they are reloaded.
    pub commands: CommandsConfig,
    /// Message grammar and reply wording.
    pub dispatch: DispatchConfig,
    /// Typing indicator refresh behaviour.
    pub typing: TypingConfig,
    /// Invocation environment exposed to handlers through `getvar`.
    pub env: HashMap<String, String>,
}

/// Command unit discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Directory scanned for command units. Defaults to `~/.chatterm/commands`.
    pub dir: PathBuf,
    /// Files starting with this prefix are support files, not units.
    pub reserved_prefix: String,
    /// File extension of command units.
    pub extension: String,
    /// Whether to watch the directory for live reload.
    pub watch: bool,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            dir: Config::dir().join("commands"),
            reserved_prefix: "__".to_string(),
            extension: "json".to_string(),
            watch: true,
        }
    }
}

/// Message grammar and reply wording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Name shown in "command not found" replies.
    pub shell_name: String,
    /// Fence tags claimed for command execution (compared case-insensitively).
    pub fenced_tags: Vec<String>,
    /// Marker every fenced command body starts with.
    pub prompt: String,
    /// Prefix introducing a bare (mundane) command.
    pub mundane_sentinel: String,
    /// Who users should contact when a command keeps failing.
    pub maintainer: Option<String>,
    /// Longest message the transport accepts.
    pub max_message_len: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shell_name: "chatterm".to_string(),
            fenced_tags: vec![
                String::new(),
                "gmsh".to_string(),
                "sh".to_string(),
                "cmd".to_string(),
            ],
            prompt: "$ ".to_string(),
            mundane_sentinel: "<<".to_string(),
            maintainer: None,
            max_message_len: 2000,
        }
    }
}

/// Typing indicator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Interval between indicator refreshes, in milliseconds.
    pub refresh_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { refresh_ms: 8000 }
    }
}

impl TypingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

impl Config {
    /// Base directory for Chatterm state (`~/.chatterm`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatterm")
    }

    /// Default config file location.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default location, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ChattermError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config: Config = serde_json::from_str(&content)?;
            info!(path = %path.display(), "Loaded configuration");
            config
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CHATTERM_COMMANDS_DIR") {
            self.commands.dir = PathBuf::from(dir);
        }
        if let Some(watch) = lookup("CHATTERM_WATCH") {
            self.commands.watch = matches!(
                watch.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(name) = lookup("CHATTERM_SHELL_NAME") {
            self.dispatch.shell_name = name;
        }
        if let Some(ms) = lookup("CHATTERM_TYPING_REFRESH_MS") {
            self.typing.refresh_ms = ms.trim().parse().map_err(|_| {
                ChattermError::Config(format!(
                    "CHATTERM_TYPING_REFRESH_MS must be a number of milliseconds, got '{}'",
                    ms
                ))
            })?;
        }
        Ok(())
    }

    /// Check the configuration for values the dispatcher cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.prompt.is_empty() {
            return Err(ChattermError::Config(
                "dispatch.prompt must not be empty".to_string(),
            ));
        }
        if self.dispatch.mundane_sentinel.is_empty() {
            return Err(ChattermError::Config(
                "dispatch.mundane_sentinel must not be empty".to_string(),
            ));
        }
        if self.typing.refresh_ms == 0 {
            return Err(ChattermError::Config(
                "typing.refresh_ms must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.max_message_len < MIN_MESSAGE_LEN {
            return Err(ChattermError::Config(format!(
                "dispatch.max_message_len must be at least {}",
                MIN_MESSAGE_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.commands.reserved_prefix, "__");
        assert_eq!(config.commands.extension, "json");
        assert_eq!(config.dispatch.prompt, "$ ");
        assert_eq!(config.dispatch.mundane_sentinel, "<<");
        assert!(config.dispatch.fenced_tags.contains(&String::new()));
        assert!(config.dispatch.fenced_tags.contains(&"sh".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "dispatch": { "shell_name": "gmsh" } }"#).unwrap();
        assert_eq!(config.dispatch.shell_name, "gmsh");
        assert_eq!(config.dispatch.prompt, "$ ");
        assert_eq!(config.typing.refresh_ms, 8000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "commands": { "dir": "/srv/commands", "watch": false }, "env": { "HOME_CHANNEL": "general" } }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.env.get("HOME_CHANNEL").map(String::as_str), Some("general"));
        assert_eq!(config.commands.extension, "json");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json"));
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ChattermError::Json(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let vars: HashMap<&str, &str> = [
            ("CHATTERM_COMMANDS_DIR", "/tmp/cmds"),
            ("CHATTERM_WATCH", "off"),
            ("CHATTERM_SHELL_NAME", "gmsh"),
            ("CHATTERM_TYPING_REFRESH_MS", "250"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.commands.dir, PathBuf::from("/tmp/cmds"));
        assert!(!config.commands.watch);
        assert_eq!(config.dispatch.shell_name, "gmsh");
        assert_eq!(config.typing.refresh_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_env_override_rejects_bad_interval() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| {
            (k == "CHATTERM_TYPING_REFRESH_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ChattermError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_refresh() {
        let mut config = Config::default();
        config.typing.refresh_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_prompt() {
        let mut config = Config::default();
        config.dispatch.prompt.clear();
        assert!(config.validate().is_err());
    }
}
