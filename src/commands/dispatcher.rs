//! Command dispatcher.
//!
//! Turns an inbound message into at most one command invocation:
//!
//! 1. Recognise the message shape (fenced block or `<<` sentinel).
//! 2. Fenced blocks need a claimed tag and the prompt marker.
//! 3. Tokenize the command line.
//! 4. Resolve the command word; unknown commands are answered with
//!    "not found" when fenced and ignored when bare.
//! 5. Bare invocations only reach commands declared mundane.
//! 6. Run the handler with a fresh [`CommandContext`].
//! 7. Usage failures are answered with the command's usage text.
//! 8. Any other failure is logged, answered with an apology, and returned
//!    to the caller as [`ChattermError::Handler`].
//!
//! Successful handlers produce all their output themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::bus::{Destination, InboundMessage};
use crate::channels::Transport;
use crate::config::{Config, DispatchConfig};
use crate::error::{ChattermError, CommandError, Result};
use crate::handlers::MessageHandler;

use super::context::CommandContext;
use super::parser::{tokenize, Grammar};
use super::registry::CommandRegistry;
use super::terminal::{Terminal, TerminalOptions};
use super::typing::TypingCoordinator;

const APOLOGY: &str =
    "Something went wrong while trying to process your request, please try again later.";
const NO_USAGE: &str = "incorrect usage, but no help text was found";

/// What the dispatcher did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a command for this dispatcher; another handler may claim it.
    Ignored,
    /// A command ran or the user was answered.
    Handled,
}

/// Routes messages to registered commands.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    transport: Arc<dyn Transport>,
    typing: TypingCoordinator,
    grammar: Grammar,
    settings: DispatchConfig,
    env: Arc<HashMap<String, String>>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        registry: Arc<CommandRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let typing =
            TypingCoordinator::new(Arc::clone(&transport), config.typing.refresh_interval());
        Self {
            registry,
            transport,
            typing,
            grammar: Grammar::from_config(&config.dispatch),
            settings: config.dispatch.clone(),
            env: Arc::new(config.env.clone()),
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Typing coordinator shared by every invocation of this dispatcher.
    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    /// Process one inbound message.
    ///
    /// Returns `Err` only for handler faults, after the user has been sent
    /// an apology.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<Dispatch> {
        let Some(line) = self.grammar.extract(&message.content) else {
            return Ok(Dispatch::Ignored);
        };
        let destination = &message.chat_id;

        let tokens = match tokenize(&line.text) {
            Ok(tokens) => tokens,
            Err(e) if line.mundane => {
                debug!(destination = %destination, error = %e, "Ignoring malformed bare command");
                return Ok(Dispatch::Ignored);
            }
            Err(e) => {
                debug!(destination = %destination, error = %e, "Malformed command line");
                let text = format!("{}: syntax error: {}", self.settings.shell_name, parse_detail(&e));
                self.reply(destination, &text, false, "").await;
                return Ok(Dispatch::Handled);
            }
        };

        let word = tokens.first().map(String::as_str).unwrap_or_default();
        let snapshot = self.registry.snapshot();
        let Some(command) = snapshot.resolve(word).filter(|_| !word.is_empty()) else {
            if line.mundane {
                return Ok(Dispatch::Ignored);
            }
            debug!(command = %word, destination = %destination, "Command not found");
            let text = format!(
                "{}: command \"{}\" not found",
                self.settings.shell_name,
                word.to_lowercase()
            );
            self.reply(destination, &text, false, "").await;
            return Ok(Dispatch::Handled);
        };

        if line.mundane && !command.is_mundane() {
            debug!(command = %command.name(), "Command is not available with the bare syntax");
            return Ok(Dispatch::Ignored);
        }

        info!(
            command = %command.name(),
            user = %message.sender_id,
            destination = %destination,
            mundane = line.mundane,
            "Dispatching command"
        );

        let mut ctx = CommandContext::new(
            destination.clone(),
            message.sender_id.clone(),
            line.mundane,
            snapshot,
            Arc::clone(&self.transport),
            self.typing.clone(),
        )
        .with_message(message.clone())
        .with_env(Arc::clone(&self.env))
        .with_max_message_len(self.settings.max_message_len);

        let result = command.invoke(&mut ctx, &tokens).await;
        drop(ctx);

        match result {
            Ok(()) => Ok(Dispatch::Handled),
            Err(CommandError::Usage(detail)) => {
                debug!(
                    command = %command.name(),
                    detail = detail.as_deref().unwrap_or(""),
                    "Incorrect command usage"
                );
                match command.usage() {
                    Some(usage) => {
                        let text = format!("usage: {}", usage);
                        self.reply(destination, &text, line.mundane, "").await;
                    }
                    None if line.mundane => {
                        self.reply(destination, NO_USAGE, true, "").await;
                    }
                    None => {
                        let text = format!("- {}", NO_USAGE);
                        self.reply(destination, &text, false, "diff").await;
                    }
                }
                Ok(Dispatch::Handled)
            }
            Err(CommandError::Fault(source)) => {
                error!(
                    command = %command.name(),
                    unit = %command.unit(),
                    line = %line.text,
                    destination = %destination,
                    error = %format!("{:#}", source),
                    "Command failed"
                );
                let mut text = APOLOGY.to_string();
                if let Some(maintainer) = &self.settings.maintainer {
                    text.push_str(&format!(
                        "\nIf this keeps happening, please contact {}.",
                        maintainer
                    ));
                }
                self.reply(destination, &text, line.mundane, "").await;
                Err(ChattermError::Handler {
                    command: command.name().to_string(),
                    source,
                })
            }
        }
    }

    async fn reply(&self, destination: &Destination, text: &str, mundane: bool, language: &str) {
        let term = Terminal::open(
            destination.clone(),
            Arc::clone(&self.transport),
            self.typing.clone(),
            TerminalOptions {
                mundane,
                language: language.to_string(),
                max_message_len: self.settings.max_message_len,
            },
        );
        term.write(text);
        term.flush().await;
    }
}

fn parse_detail(err: &ChattermError) -> String {
    match err {
        ChattermError::Parse(detail) => detail.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    fn name(&self) -> &str {
        "commands"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<bool> {
        Ok(self.dispatch(message).await? == Dispatch::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::UserId;
    use crate::channels::{DeliveryHandle, MemoryTransport, MockTransport};
    use crate::commands::descriptor::CommandDescriptor;
    use futures::future::join_all;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.typing.refresh_ms = 20;
        config
    }

    fn recorder(name: &str, mundane: bool, calls: Arc<Mutex<Vec<Vec<String>>>>) -> CommandDescriptor {
        CommandDescriptor::builder(name)
            .usage(format!("{} <n>", name))
            .mundane(mundane)
            .handler_fn(move |_ctx, args, _meta| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.lock().push(args.to_vec());
                    Ok(())
                })
            })
    }

    fn failing(name: &str, usage: Option<&str>, fault: bool) -> CommandDescriptor {
        let mut builder = CommandDescriptor::builder(name).mundane(true);
        if let Some(usage) = usage {
            builder = builder.usage(usage);
        }
        builder.handler_fn(move |_ctx, _args, _meta| {
            Box::pin(async move {
                if fault {
                    Err(CommandError::Fault(anyhow::anyhow!("database password rejected")))
                } else {
                    Err(CommandError::usage())
                }
            })
        })
    }

    fn setup(
        commands: Vec<CommandDescriptor>,
    ) -> (Dispatcher, Arc<MemoryTransport>) {
        let registry = Arc::new(CommandRegistry::new());
        registry.load("test", commands).unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = Dispatcher::new(&config(), registry, transport.clone());
        (dispatcher, transport)
    }

    fn msg(content: &str) -> InboundMessage {
        InboundMessage::new("memory", "alice", "general", content)
    }

    fn general() -> Destination {
        Destination::from("general")
    }

    #[tokio::test]
    async fn test_fenced_invocation_passes_tokens() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _) = setup(vec![recorder("ping", true, calls.clone())]);

        let outcome = dispatcher.dispatch(&msg("``` $ ping```")).await.unwrap();
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(*calls.lock(), vec![vec!["ping".to_string()]]);
    }

    #[tokio::test]
    async fn test_arguments_are_shell_split() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _) = setup(vec![recorder("roll", true, calls.clone())]);

        dispatcher
            .dispatch(&msg("```sh\n$ ROLL \"2 d6\" fast # why not```"))
            .await
            .unwrap();
        assert_eq!(*calls.lock(), vec![vec!["ROLL", "2 d6", "fast"]]);
    }

    #[tokio::test]
    async fn test_unknown_fenced_command_replies_not_found() {
        let (dispatcher, transport) = setup(vec![]);

        let outcome = dispatcher.dispatch(&msg("``` $ unknown```")).await.unwrap();
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(
            transport.sent_to(&general()),
            vec!["```\nchatterm: command \"unknown\" not found\n```"]
        );
    }

    #[tokio::test]
    async fn test_not_found_reply_uses_lowercased_word() {
        let (dispatcher, transport) = setup(vec![]);

        dispatcher.dispatch(&msg("``` $ UnKnown now```")).await.unwrap();
        assert_eq!(
            transport.sent_to(&general()),
            vec!["```\nchatterm: command \"unknown\" not found\n```"]
        );
    }

    #[tokio::test]
    async fn test_unknown_bare_command_is_ignored() {
        let (dispatcher, transport) = setup(vec![]);

        let outcome = dispatcher.dispatch(&msg("<<unknown")).await.unwrap();
        assert_eq!(outcome, Dispatch::Ignored);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_commands_are_ignored() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, transport) = setup(vec![recorder("ping", true, calls.clone())]);

        for content in ["hello there", "```sql\nSELECT 1```", "```ping```", "< <ping"] {
            let outcome = dispatcher.dispatch(&msg(content)).await.unwrap();
            assert_eq!(outcome, Dispatch::Ignored, "claimed: {}", content);
        }
        assert!(calls.lock().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bare_syntax_only_reaches_mundane_commands() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _) = setup(vec![
            recorder("deploy", false, calls.clone()),
            recorder("ping", true, calls.clone()),
        ]);

        assert_eq!(
            dispatcher.dispatch(&msg("<<deploy")).await.unwrap(),
            Dispatch::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&msg("``` $ deploy```")).await.unwrap(),
            Dispatch::Handled
        );
        assert_eq!(
            dispatcher.dispatch(&msg("<<ping")).await.unwrap(),
            Dispatch::Handled
        );
        assert_eq!(calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_usage_error_replies_usage_text() {
        let (dispatcher, transport) = setup(vec![failing("ping", Some("ping <n>"), false)]);

        let outcome = dispatcher.dispatch(&msg("<<ping")).await.unwrap();
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(transport.sent_to(&general()), vec!["usage: ping <n>"]);

        dispatcher.dispatch(&msg("``` $ ping```")).await.unwrap();
        assert_eq!(
            transport.sent_to(&general())[1],
            "```\nusage: ping <n>\n```"
        );
    }

    #[tokio::test]
    async fn test_usage_error_without_usage_text() {
        let (dispatcher, transport) = setup(vec![failing("ping", None, false)]);

        dispatcher.dispatch(&msg("<<ping")).await.unwrap();
        dispatcher.dispatch(&msg("``` $ ping```")).await.unwrap();

        assert_eq!(
            transport.sent_to(&general()),
            vec![
                NO_USAGE.to_string(),
                format!("```diff\n- {}\n```", NO_USAGE)
            ]
        );
    }

    #[tokio::test]
    async fn test_fault_apologises_and_propagates() {
        let (dispatcher, transport) = setup(vec![failing("ping", Some("ping <n>"), true)]);

        let err = dispatcher.dispatch(&msg("<<ping")).await.unwrap_err();
        match err {
            ChattermError::Handler { command, source } => {
                assert_eq!(command, "ping");
                assert!(source.to_string().contains("password"));
            }
            other => panic!("expected handler error, got {:?}", other),
        }

        let sent = transport.sent_to(&general());
        assert_eq!(sent, vec![APOLOGY.to_string()]);
        assert!(!sent[0].contains("password"));
    }

    #[tokio::test]
    async fn test_fault_mentions_maintainer() {
        let registry = Arc::new(CommandRegistry::new());
        registry
            .load("test", vec![failing("ping", None, true)])
            .unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let mut config = config();
        config.dispatch.maintainer = Some("@ops".to_string());
        let dispatcher = Dispatcher::new(&config, registry, transport.clone());

        assert!(dispatcher.dispatch(&msg("``` $ ping```")).await.is_err());
        let sent = transport.sent_to(&general());
        assert!(sent[0].starts_with("```\nSomething went wrong"));
        assert!(sent[0].contains("@ops"));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let (dispatcher, transport) = setup(vec![]);

        assert_eq!(
            dispatcher.dispatch(&msg("<<")).await.unwrap(),
            Dispatch::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&msg("``` $ ```")).await.unwrap(),
            Dispatch::Handled
        );
        assert_eq!(
            transport.sent_to(&general()),
            vec!["```\nchatterm: command \"\" not found\n```"]
        );
    }

    #[tokio::test]
    async fn test_unterminated_quote() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, transport) = setup(vec![recorder("ping", true, calls.clone())]);

        assert_eq!(
            dispatcher.dispatch(&msg("<<ping \"oops")).await.unwrap(),
            Dispatch::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(&msg("``` $ ping \"oops```")).await.unwrap(),
            Dispatch::Handled
        );
        assert!(calls.lock().is_empty());
        let sent = transport.sent_to(&general());
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("syntax error"));
    }

    #[tokio::test]
    async fn test_reload_is_visible_to_next_message() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, transport) = setup(vec![]);

        dispatcher.dispatch(&msg("``` $ ping```")).await.unwrap();
        dispatcher
            .registry()
            .load("late", vec![recorder("ping", true, calls.clone())])
            .unwrap();
        dispatcher.dispatch(&msg("``` $ ping```")).await.unwrap();

        assert_eq!(transport.sent_to(&general()).len(), 1);
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_output_is_formatted_per_invocation() {
        let echo = CommandDescriptor::builder("say")
            .mundane(true)
            .handler_fn(|ctx, args, _meta| {
                Box::pin(async move {
                    ctx.reply(args[1..].join(" ")).await;
                    Ok(())
                })
            });
        let (dispatcher, transport) = setup(vec![echo]);

        dispatcher.dispatch(&msg("<<say hi")).await.unwrap();
        dispatcher.dispatch(&msg("``` $ say hi```")).await.unwrap();

        assert_eq!(transport.sent_to(&general()), vec!["hi", "```\nhi\n```"]);
    }

    #[tokio::test]
    async fn test_dm_reply_through_transport() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let mut mock = MockTransport::new();
        mock.expect_private_channel()
            .times(1)
            .returning(|user: &UserId| Ok(Destination::new(format!("dm-{}", user))));
        {
            let delivered = Arc::clone(&delivered);
            mock.expect_send_message()
                .returning(move |dest: &Destination, text: &str| {
                    delivered.lock().push((dest.to_string(), text.to_string()));
                    Ok(DeliveryHandle {
                        destination: dest.clone(),
                        message_id: 1,
                    })
                });
        }

        let whisper = CommandDescriptor::builder("whisper")
            .mundane(true)
            .handler_fn(|ctx, _args, _meta| {
                Box::pin(async move {
                    let term = ctx.dm_terminal().await?;
                    term.write("secret");
                    term.flush().await;
                    Ok::<(), CommandError>(())
                })
            });

        let registry = Arc::new(CommandRegistry::new());
        registry.load("test", vec![whisper]).unwrap();
        let dispatcher = Dispatcher::new(&config(), registry, Arc::new(mock));

        dispatcher.dispatch(&msg("<<whisper")).await.unwrap();
        assert_eq!(
            *delivered.lock(),
            vec![("dm-alice".to_string(), "secret".to_string())]
        );
    }

    #[tokio::test]
    async fn test_message_handler_impl() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (dispatcher, _) = setup(vec![recorder("ping", true, calls)]);

        assert!(dispatcher.handle(&msg("<<ping")).await.unwrap());
        assert!(!dispatcher.handle(&msg("ping")).await.unwrap());
        assert_eq!(dispatcher.name(), "commands");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_typing_commands_release_indicator() {
        let slow = CommandDescriptor::builder("build")
            .mundane(true)
            .handler_fn(|ctx, args, _meta| {
                Box::pin(async move {
                    let term = ctx.new_terminal();
                    term.start_typing();
                    let ms: u64 = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(10);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    term.write("built");
                    Ok(())
                })
            });
        let (dispatcher, transport) = setup(vec![slow]);
        let dispatcher = Arc::new(dispatcher);

        let runs = (0..16).map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let content = format!("<<build {}", 5 + (i % 4) * 15);
                dispatcher.dispatch(&msg(&content)).await.unwrap()
            })
        });
        for outcome in join_all(runs).await {
            assert_eq!(outcome.unwrap(), Dispatch::Handled);
        }

        // Every context is gone, so nobody participates any more
        assert!(!dispatcher.typing().is_active(&general()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while transport.is_typing(&general()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "typing indicator still asserted"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(transport.typing_refreshes(&general()) >= 1);
    }
}
