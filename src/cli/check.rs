//! Check command: load the commands directory and print what resolves.

use anyhow::{bail, Context, Result};

use chatterm::commands::{LoadPolicy, UnitLoader};
use chatterm::config::Config;

pub(crate) fn cmd_check(config: Config) -> Result<()> {
    let dir = &config.commands.dir;
    if !dir.is_dir() {
        bail!("Commands directory {} does not exist", dir.display());
    }

    let registry = super::builtin_registry()?;
    let loader = UnitLoader::from_config(&config.commands);
    let report = registry
        .load_directory(dir, &loader, LoadPolicy::FailFast)
        .with_context(|| format!("Failed to load commands from {}", dir.display()))?;

    let table = registry.snapshot();
    println!("{:<20} {:<8} {:<20} UNIT", "COMMAND", "SYNTAX", "ALIASES");
    for desc in table.commands() {
        println!(
            "{:<20} {:<8} {:<20} {}",
            desc.name(),
            if desc.is_mundane() { "bare" } else { "fenced" },
            desc.aliases().join(","),
            desc.unit()
        );
    }
    println!();
    println!(
        "{} commands from {} units ({} loaded from {})",
        table.commands().len(),
        table.units().len(),
        report.loaded.len(),
        dir.display()
    );
    Ok(())
}
