use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "chatterm")]
#[command(about = "Hot-reloadable command dispatcher for chat bots", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch messages read from stdin, one per line
    Run {
        /// Config file (defaults to ~/.chatterm/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Commands directory, overriding the config
        #[arg(long)]
        commands: Option<PathBuf>,
        /// Do not reload units when the directory changes
        #[arg(long)]
        no_watch: bool,
    },
    /// Load the commands directory and print the command table
    Check {
        /// Config file (defaults to ~/.chatterm/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Commands directory, overriding the config
        #[arg(long)]
        commands: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries console deliveries
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Some(Commands::Version) | None => {
            println!("chatterm {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run {
            config,
            commands,
            no_watch,
        }) => {
            let mut config = cli::load_config(config, commands)?;
            if no_watch {
                config.commands.watch = false;
            }
            cli::run::cmd_run(config).await?;
        }
        Some(Commands::Check { config, commands }) => {
            let config = cli::load_config(config, commands)?;
            cli::check::cmd_check(config)?;
        }
    }

    Ok(())
}
