//! Command unit files.
//!
//! A unit is one JSON file directly under the commands directory:
//!
//! ```json
//! {
//!   "commands": [
//!     {
//!       "name": "greet",
//!       "aliases": ["hi"],
//!       "usage": "greet <name>",
//!       "mundane": true,
//!       "action": { "type": "reply", "text": "hello {{1}}, from {{user}}" }
//!     },
//!     {
//!       "name": "uptime",
//!       "action": { "type": "exec", "program": "uptime", "timeout_secs": 5 }
//!     }
//!   ]
//! }
//! ```
//!
//! Templates understand `{{0}}` (the command word), `{{1}}`, `{{2}}`, ...
//! (positional arguments), `{{args}}` (every argument after the command
//! word), `{{user}}` and `{{var:NAME}}`. An `exec` argument that is exactly
//! `{{args}}` expands to one process argument per user argument. Programs
//! are run directly, never through a shell.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CommandsConfig;
use crate::error::{ChattermError, CommandError, CommandResult, Result};

use super::context::CommandContext;
use super::descriptor::{CommandDescriptor, CommandHandler, Metadata};
use super::terminal::Terminal;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,64}$").expect("command key pattern"));

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern"));

/// Contents of a unit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitManifest {
    pub commands: Vec<CommandDef>,
}

/// One command declared in a unit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub mundane: bool,
    #[serde(default)]
    pub metadata: Metadata,
    /// Minimum number of arguments after the command word.
    #[serde(default)]
    pub min_args: usize,
    /// Answer in the invoking user's private channel.
    #[serde(default)]
    pub dm: bool,
    pub action: CommandAction,
}

/// What a declared command does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandAction {
    /// Write a rendered template.
    Reply { text: String },
    /// Run a program and write its standard output.
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl CommandAction {
    fn templates(&self) -> Vec<&str> {
        match self {
            CommandAction::Reply { text } => vec![text.as_str()],
            CommandAction::Exec { args, .. } => args.iter().map(String::as_str).collect(),
        }
    }
}

/// Discovers and parses unit files.
#[derive(Debug, Clone)]
pub struct UnitLoader {
    reserved_prefix: String,
    extension: String,
}

impl Default for UnitLoader {
    fn default() -> Self {
        Self::from_config(&CommandsConfig::default())
    }
}

impl UnitLoader {
    pub fn from_config(config: &CommandsConfig) -> Self {
        Self {
            reserved_prefix: config.reserved_prefix.clone(),
            extension: config.extension.trim_start_matches('.').to_lowercase(),
        }
    }

    /// Whether `path` names a unit file (by name only; the file need not
    /// exist). Hidden files, support files starting with the reserved
    /// prefix, and other extensions are not units.
    pub fn is_unit_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        if !self.reserved_prefix.is_empty() && name.starts_with(&self.reserved_prefix) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase() == self.extension)
            .unwrap_or(false)
    }

    /// Stable identifier of the unit stored at `path`.
    ///
    /// Only the parent directory is canonicalized, so a deleted file maps
    /// to the same id it had while it existed.
    pub fn unit_id(&self, path: &Path) -> String {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        match path.file_name() {
            Some(name) => parent.join(name).display().to_string(),
            None => path.display().to_string(),
        }
    }

    /// Read, validate and build every command in a unit file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<CommandDescriptor>> {
        let unit = self.unit_id(path);
        let content = std::fs::read_to_string(path).map_err(|e| ChattermError::Load {
            unit: unit.clone(),
            message: format!("failed to read file: {}", e),
        })?;
        parse_unit(&unit, &content)
    }
}

/// Parse and validate the JSON text of a unit.
pub fn parse_unit(unit: &str, content: &str) -> Result<Vec<CommandDescriptor>> {
    let load_error = |message: String| ChattermError::Load {
        unit: unit.to_string(),
        message,
    };

    let manifest: UnitManifest =
        serde_json::from_str(content).map_err(|e| load_error(format!("invalid JSON: {}", e)))?;
    validate_manifest(&manifest).map_err(load_error)?;

    debug!(unit = %unit, commands = manifest.commands.len(), "Parsed command unit");
    Ok(manifest.commands.into_iter().map(build_descriptor).collect())
}

/// Check a manifest for names, programs and templates the loader cannot use.
pub fn validate_manifest(manifest: &UnitManifest) -> std::result::Result<(), String> {
    if manifest.commands.is_empty() {
        return Err("a unit must define at least one command".to_string());
    }

    for def in &manifest.commands {
        if !KEY_RE.is_match(&def.name) {
            return Err(format!(
                "invalid command name '{}': must be 1-64 characters of letters, digits, '_' and '-'",
                def.name
            ));
        }
        for alias in &def.aliases {
            if !KEY_RE.is_match(alias) {
                return Err(format!(
                    "invalid alias '{}' for command '{}': must be 1-64 characters of letters, digits, '_' and '-'",
                    alias, def.name
                ));
            }
        }
        if let CommandAction::Exec { program, .. } = &def.action {
            if program.trim().is_empty() {
                return Err(format!("command '{}' has an empty program", def.name));
            }
        }
        for template in def.action.templates() {
            for caps in PLACEHOLDER_RE.captures_iter(template) {
                if Placeholder::parse(&caps[1]).is_none() {
                    return Err(format!(
                        "command '{}' uses unknown placeholder '{}'",
                        def.name, &caps[0]
                    ));
                }
            }
        }
    }

    Ok(())
}

fn build_descriptor(def: CommandDef) -> CommandDescriptor {
    let mut builder = CommandDescriptor::builder(def.name)
        .aliases(def.aliases)
        .mundane(def.mundane)
        .metadata(def.metadata);
    if let Some(usage) = def.usage {
        builder = builder.usage(usage);
    }
    builder.build(ScriptHandler {
        action: def.action,
        min_args: def.min_args,
        dm: def.dm,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder<'a> {
    Position(usize),
    Args,
    User,
    Var(&'a str),
}

impl<'a> Placeholder<'a> {
    fn parse(key: &'a str) -> Option<Self> {
        match key {
            "args" => Some(Placeholder::Args),
            "user" => Some(Placeholder::User),
            _ => {
                if let Some(name) = key.strip_prefix("var:") {
                    let name = name.trim();
                    return (!name.is_empty()).then_some(Placeholder::Var(name));
                }
                key.parse().ok().map(Placeholder::Position)
            }
        }
    }
}

/// Handler behind every command declared in a unit file.
pub struct ScriptHandler {
    action: CommandAction,
    min_args: usize,
    dm: bool,
}

#[async_trait]
impl CommandHandler for ScriptHandler {
    async fn call(
        &self,
        ctx: &mut CommandContext,
        args: &[String],
        _metadata: &Metadata,
    ) -> CommandResult {
        let given = args.len().saturating_sub(1);
        if given < self.min_args {
            return Err(CommandError::usage_with(format!(
                "expected at least {} arguments, got {}",
                self.min_args, given
            )));
        }

        match &self.action {
            CommandAction::Reply { text } => {
                let rendered = render(text, ctx, args)?;
                let term = self.terminal(ctx).await?;
                term.write(rendered);
            }
            CommandAction::Exec {
                program,
                args: template_args,
                timeout_secs,
            } => {
                let mut argv = Vec::with_capacity(template_args.len());
                for template in template_args {
                    if PLACEHOLDER_RE
                        .captures(template)
                        .map(|c| c[0].len() == template.len() && &c[1] == "args")
                        .unwrap_or(false)
                    {
                        argv.extend(args.iter().skip(1).cloned());
                    } else {
                        argv.push(render(template, ctx, args)?);
                    }
                }

                let term = self.terminal(ctx).await?;
                term.start_typing();
                let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
                let result = run_program(program, &argv, timeout).await;
                term.stop_typing();

                let stdout = result?;
                let stdout = stdout.trim_end();
                if !stdout.is_empty() {
                    term.write(stdout);
                }
            }
        }
        Ok(())
    }
}

impl ScriptHandler {
    async fn terminal(&self, ctx: &mut CommandContext) -> Result<Terminal> {
        if self.dm {
            ctx.dm_terminal().await
        } else {
            Ok(ctx.new_terminal())
        }
    }
}

/// Expand placeholders in `template`.
///
/// A positional placeholder past the end of `args` is a usage failure.
/// Unset variables expand to nothing.
fn render(
    template: &str,
    ctx: &CommandContext,
    args: &[String],
) -> std::result::Result<String, CommandError> {
    let mut missing = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        match Placeholder::parse(&caps[1]) {
            Some(Placeholder::Position(n)) => match args.get(n) {
                Some(arg) => arg.clone(),
                None => {
                    missing.get_or_insert(n);
                    String::new()
                }
            },
            Some(Placeholder::Args) => args.get(1..).unwrap_or_default().join(" "),
            Some(Placeholder::User) => ctx.user().to_string(),
            Some(Placeholder::Var(name)) => ctx.getvar(name).unwrap_or_default().to_string(),
            // Rejected at load time
            None => caps[0].to_string(),
        }
    });

    match missing {
        Some(n) => Err(CommandError::usage_with(format!("missing argument {}", n))),
        None => Ok(rendered.into_owned()),
    }
}

async fn run_program(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> std::result::Result<String, CommandError> {
    debug!(program = %program, args = ?args, "Running command program");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", program))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow!("'{}' timed out after {}s", program, timeout.as_secs()))?
        .with_context(|| format!("failed to wait for '{}'", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program = %program, status = ?output.status.code(), stderr = %stderr.trim(), "Command program failed");
        return Err(anyhow!(
            "'{}' exited with code {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        )
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
