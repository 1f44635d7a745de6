//! Commands compiled into the binary.
//!
//! They are declared with the same builder API as any embedded command and
//! registered as the [`BUILTIN_UNIT`] unit.

use async_trait::async_trait;

use crate::error::{CommandError, CommandResult};

use super::context::CommandContext;
use super::descriptor::{CommandDescriptor, CommandHandler, Metadata};

/// Unit id of the built-in commands.
pub const BUILTIN_UNIT: &str = "builtin";

/// Descriptors of every built-in command.
pub fn builtin_commands() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::builder("help")
            .alias("?")
            .usage("help [command]")
            .mundane(true)
            .build(HelpCommand),
        CommandDescriptor::builder("echo")
            .usage("echo <text>...")
            .mundane(true)
            .handler_fn(|ctx, args, _meta| {
                Box::pin(async move {
                    if args.len() < 2 {
                        return Err(CommandError::usage());
                    }
                    ctx.new_terminal().write(args[1..].join(" "));
                    Ok(())
                })
            }),
    ]
}

/// Lists the available commands, or describes one.
struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn call(
        &self,
        ctx: &mut CommandContext,
        args: &[String],
        _metadata: &Metadata,
    ) -> CommandResult {
        let text = match args.get(1) {
            Some(name) => match ctx.registry().resolve(name) {
                Some(desc) => {
                    let mut text = match desc.usage() {
                        Some(usage) => format!("usage: {}", usage),
                        None => format!("{}: no usage text", desc.name()),
                    };
                    if !desc.aliases().is_empty() {
                        text.push_str(&format!("\naliases: {}", desc.aliases().join(", ")));
                    }
                    text
                }
                None => format!("help: no such command '{}'", name),
            },
            None => {
                let mut lines = vec!["Available commands:".to_string()];
                for desc in ctx.registry().commands() {
                    // Bare invocations only reach mundane commands
                    if ctx.is_mundane() && !desc.is_mundane() {
                        continue;
                    }
                    let mut line = format!("  {}", desc.name());
                    if !desc.aliases().is_empty() {
                        line.push_str(&format!(" ({})", desc.aliases().join(", ")));
                    }
                    if let Some(usage) = desc.usage() {
                        line.push_str(&format!(" - {}", usage));
                    }
                    lines.push(line);
                }
                lines.join("\n")
            }
        };

        ctx.new_terminal().write(text);
        Ok(())
    }
}
