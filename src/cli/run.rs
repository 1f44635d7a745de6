//! Run command: dispatch console input against the loaded commands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use chatterm::bus::InboundMessage;
use chatterm::channels::{ConsoleTransport, Transport};
use chatterm::commands::{Dispatcher, LoadPolicy, ModuleWatcher, UnitLoader};
use chatterm::config::Config;
use chatterm::handlers::HandlerChain;

/// Channel name and destination of console input.
const CONSOLE: &str = "console";

/// Time given to in-flight deliveries before exit.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

pub(crate) async fn cmd_run(config: Config) -> Result<()> {
    let registry = Arc::new(super::builtin_registry()?);
    let loader = UnitLoader::from_config(&config.commands);
    let dir = config.commands.dir.clone();

    if dir.is_dir() {
        let report = registry
            .load_directory(&dir, &loader, LoadPolicy::FailFast)
            .with_context(|| format!("Failed to load commands from {}", dir.display()))?;
        info!(dir = %dir.display(), units = report.loaded.len(), "Loaded command units");
    } else {
        warn!(dir = %dir.display(), "Commands directory does not exist, only built-in commands are available");
    }

    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new());
    let dispatcher = Arc::new(Dispatcher::new(&config, Arc::clone(&registry), transport));

    let mut chain = HandlerChain::new();
    chain.register(dispatcher.clone());
    let chain = Arc::new(chain);

    let mut watcher = None;
    if config.commands.watch && dir.is_dir() {
        let (mut w, mut errors) = ModuleWatcher::new(&dir, Arc::clone(&registry), loader);
        w.start()?;
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                warn!(error = %e, "Command unit change was not applied");
            }
        });
        watcher = Some(w);
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "console".to_string());
    let faults = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("chatterm {} ready. Press Ctrl+C to stop.", env!("CARGO_PKG_VERSION"));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message = InboundMessage::new(CONSOLE, &user, CONSOLE, &unescape(&line));
                let chain = Arc::clone(&chain);
                let faults = Arc::clone(&faults);
                tasks.spawn(async move {
                    match chain.handle(&message).await {
                        Ok(Some(_)) => {}
                        Ok(None) => info!(content = %message.content, "Message not claimed"),
                        Err(e) => {
                            faults.fetch_add(1, Ordering::SeqCst);
                            error!(error = %e, "Message handling failed");
                        }
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Message task panicked");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Message task panicked");
        }
    }
    tokio::time::sleep(DRAIN_GRACE).await;

    if let Some(mut w) = watcher {
        w.stop();
    }
    dispatcher.typing().stop_all();

    let faults = faults.load(Ordering::SeqCst);
    if faults > 0 {
        warn!(faults, "Some commands failed");
    }
    Ok(())
}

/// Turn `\n` and `\\` escapes into a newline and a backslash.
fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("```sh\\n$ ls```"), "```sh\n$ ls```");
        assert_eq!(unescape("a\\\\nb"), "a\\nb");
        assert_eq!(unescape("say \\\"hi\\\""), "say \\\"hi\\\"");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }
}
