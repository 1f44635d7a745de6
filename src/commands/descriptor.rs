//! Command descriptors and the builder used to declare them.
//!
//! A [`CommandDescriptor`] is immutable once registered. Declaring a
//! command and registering it are two separate steps: the builder produces
//! a value, and [`CommandRegistry::load`](super::CommandRegistry::load)
//! stamps it with its source unit and makes it resolvable.
//!
//! ```rust
//! use chatterm::commands::{CommandDescriptor, CommandRegistry};
//!
//! let ping = CommandDescriptor::builder("ping")
//!     .usage("ping [message]")
//!     .alias("p")
//!     .mundane(true)
//!     .handler_fn(|ctx, args, _meta| {
//!         Box::pin(async move {
//!             ctx.new_terminal().write(format!("pong {}", args[1..].join(" ")));
//!             Ok(())
//!         })
//!     });
//!
//! let registry = CommandRegistry::new();
//! registry.load("example", vec![ping]).unwrap();
//! assert!(registry.resolve("P").is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::CommandResult;

use super::context::CommandContext;

/// Opaque key/value data attached to a command and handed to its handler.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Code run when a command is invoked.
///
/// `args[0]` is the command word exactly as the user typed it; the
/// remaining entries are the parsed arguments.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &mut CommandContext,
        args: &[String],
        metadata: &Metadata,
    ) -> CommandResult;
}

/// Adapter turning a closure returning a boxed future into a handler.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut CommandContext, &'a [String], &'a Metadata) -> BoxFuture<'a, CommandResult>
        + Send
        + Sync,
{
    async fn call(
        &self,
        ctx: &mut CommandContext,
        args: &[String],
        metadata: &Metadata,
    ) -> CommandResult {
        (self.0)(ctx, args, metadata).await
    }
}

/// A registered (or registrable) command.
#[derive(Clone)]
pub struct CommandDescriptor {
    name: String,
    aliases: Vec<String>,
    usage: Option<String>,
    mundane: bool,
    metadata: Metadata,
    unit: String,
    handler: Arc<dyn CommandHandler>,
}

impl CommandDescriptor {
    /// Start declaring a command called `name`.
    pub fn builder(name: impl Into<String>) -> CommandBuilder {
        CommandBuilder {
            name: name.into(),
            aliases: Vec::new(),
            usage: None,
            mundane: false,
            metadata: Metadata::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    /// Whether the command may be invoked with the bare `<<` syntax.
    pub fn is_mundane(&self) -> bool {
        self.mundane
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Identifier of the unit this command was loaded from. Empty until
    /// the descriptor has been registered.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Registry keys of this command: the name followed by its aliases,
    /// lowercased.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|k| k.to_lowercase())
    }

    /// Run the handler with this command's metadata.
    pub async fn invoke(&self, ctx: &mut CommandContext, args: &[String]) -> CommandResult {
        self.handler.call(ctx, args, &self.metadata).await
    }

    pub(crate) fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("usage", &self.usage)
            .field("mundane", &self.mundane)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Builder for [`CommandDescriptor`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    name: String,
    aliases: Vec<String>,
    usage: Option<String>,
    mundane: bool,
    metadata: Metadata,
}

impl CommandBuilder {
    /// Usage text shown when the handler reports incorrect usage.
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Allow the bare `<<command` invocation style.
    pub fn mundane(mut self, mundane: bool) -> Self {
        self.mundane = mundane;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Finish the declaration with a handler.
    pub fn build<H>(self, handler: H) -> CommandDescriptor
    where
        H: CommandHandler + 'static,
    {
        self.build_shared(Arc::new(handler))
    }

    /// Finish the declaration with an already shared handler.
    pub fn build_shared(self, handler: Arc<dyn CommandHandler>) -> CommandDescriptor {
        CommandDescriptor {
            name: self.name,
            aliases: self.aliases,
            usage: self.usage,
            mundane: self.mundane,
            metadata: self.metadata,
            unit: String::new(),
            handler,
        }
    }

    /// Finish the declaration with a closure handler.
    pub fn handler_fn<F>(self, f: F) -> CommandDescriptor
    where
        F: for<'a> Fn(&'a mut CommandContext, &'a [String], &'a Metadata) -> BoxFuture<'a, CommandResult>
            + Send
            + Sync
            + 'static,
    {
        self.build(FnHandler(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl CommandHandler for Nop {
        async fn call(&self, _: &mut CommandContext, _: &[String], _: &Metadata) -> CommandResult {
            Ok(())
        }
    }

    #[test]
    fn test_builder_defaults() {
        let cmd = CommandDescriptor::builder("ping").build(Nop);
        assert_eq!(cmd.name(), "ping");
        assert!(cmd.aliases().is_empty());
        assert!(cmd.usage().is_none());
        assert!(!cmd.is_mundane());
        assert!(cmd.metadata().is_empty());
        assert_eq!(cmd.unit(), "");
    }

    #[test]
    fn test_builder_all_fields() {
        let cmd = CommandDescriptor::builder("Roll")
            .usage("roll <dice>")
            .alias("r")
            .aliases(["dice", "D"])
            .mundane(true)
            .meta("sides", 6)
            .build(Nop);

        assert_eq!(cmd.usage(), Some("roll <dice>"));
        assert!(cmd.is_mundane());
        assert_eq!(cmd.metadata().get("sides"), Some(&serde_json::json!(6)));
        let keys: Vec<String> = cmd.keys().collect();
        assert_eq!(keys, vec!["roll", "r", "dice", "d"]);
    }

    #[test]
    fn test_with_unit_stamps_source() {
        let cmd = CommandDescriptor::builder("ping").build(Nop).with_unit("a.json");
        assert_eq!(cmd.unit(), "a.json");
    }

    #[test]
    fn test_debug_omits_handler() {
        let cmd = CommandDescriptor::builder("ping").build(Nop);
        let debug = format!("{:?}", cmd);
        assert!(debug.contains("ping"));
        assert!(!debug.contains("handler"));
    }
}
