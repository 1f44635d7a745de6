//! Command registry.
//!
//! The registry maps every command key (name or alias, lowercased) to the
//! descriptor that owns it, and remembers which source unit each
//! descriptor came from so a unit can be reloaded or dropped as a whole.
//!
//! The table is copy-on-write: writers build a new table under the write
//! lock and swap it in, so readers holding a [`RegistrySnapshot`] are never
//! affected by a concurrent load or unload, and `resolve` only ever takes a
//! short read lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::error::{ChattermError, Result};

use super::descriptor::CommandDescriptor;
use super::loader::UnitLoader;

/// Immutable view of the registry at one point in time.
pub type RegistrySnapshot = Arc<CommandTable>;

/// The data behind the registry.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    /// Lowercased key to owning descriptor.
    keys: HashMap<String, Arc<CommandDescriptor>>,
    /// Unit id to the descriptors it contributed.
    units: HashMap<String, Vec<Arc<CommandDescriptor>>>,
}

impl CommandTable {
    /// Case-insensitive lookup.
    pub fn resolve(&self, key: &str) -> Option<Arc<CommandDescriptor>> {
        self.keys.get(&key.to_lowercase()).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Each resolvable descriptor once, sorted by name.
    pub fn commands(&self) -> Vec<Arc<CommandDescriptor>> {
        let mut out: Vec<Arc<CommandDescriptor>> = Vec::new();
        for desc in self.keys.values() {
            if !out.iter().any(|d| Arc::ptr_eq(d, desc)) {
                out.push(Arc::clone(desc));
            }
        }
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Ids of the loaded units, sorted.
    pub fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = self.units.keys().cloned().collect();
        units.sort();
        units
    }

    /// Names of the commands a unit contributed, sorted.
    pub fn unit_commands(&self, unit: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .units
            .get(unit)
            .map(|descs| descs.iter().map(|d| d.name().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn remove_unit(&mut self, unit: &str) -> usize {
        let removed = self.units.remove(unit).map(|d| d.len()).unwrap_or(0);
        self.keys.retain(|_, desc| desc.unit() != unit);
        removed
    }
}

/// How [`CommandRegistry::load_directory`] treats a unit that fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Return the first error (startup).
    FailFast,
    /// Log the failure and continue with the remaining units (runtime).
    Tolerant,
}

/// Result of loading a directory of units.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Units loaded successfully.
    pub loaded: Vec<String>,
    /// Units that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Thread-safe registry of commands keyed by name and alias.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    table: RwLock<RegistrySnapshot>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of the table.
    pub fn snapshot(&self) -> RegistrySnapshot {
        Arc::clone(&self.table.read())
    }

    /// Case-insensitive lookup of a command by name or alias.
    pub fn resolve(&self, key: &str) -> Option<Arc<CommandDescriptor>> {
        self.table.read().resolve(key)
    }

    /// Replace everything `unit` contributed with `descriptors`.
    ///
    /// The previous version of the unit is dropped first, so loading the
    /// same unit twice is the same as loading it once. A key already owned
    /// by a different unit fails the whole load with
    /// [`ChattermError::DuplicateCommand`] and leaves the registry exactly
    /// as it was. Within one unit a repeated key is last-wins.
    ///
    /// Returns the number of descriptors registered.
    pub fn load(&self, unit: &str, descriptors: Vec<CommandDescriptor>) -> Result<usize> {
        let mut guard = self.table.write();
        let mut next = CommandTable::clone(&guard);
        let replaced = next.remove_unit(unit);

        let mut staged: HashMap<String, Arc<CommandDescriptor>> = HashMap::new();
        let mut owned: Vec<Arc<CommandDescriptor>> = Vec::with_capacity(descriptors.len());

        for desc in descriptors {
            let desc = Arc::new(desc.with_unit(unit));
            for key in desc.keys() {
                if let Some(existing) = next.keys.get(&key) {
                    warn!(
                        command = %key,
                        unit = %unit,
                        existing_unit = %existing.unit(),
                        "Command key collides with another unit, load rejected"
                    );
                    return Err(ChattermError::DuplicateCommand {
                        key,
                        unit: unit.to_string(),
                        existing_unit: existing.unit().to_string(),
                    });
                }
                if let Some(previous) = staged.insert(key.clone(), Arc::clone(&desc)) {
                    warn!(
                        command = %key,
                        unit = %unit,
                        replaced = %previous.name(),
                        "Command key declared twice in one unit, keeping the later one"
                    );
                }
            }
            owned.push(desc);
        }

        // Drop descriptors whose every key was taken over by a later one.
        owned.retain(|d| staged.values().any(|s| Arc::ptr_eq(s, d)));
        let count = owned.len();

        next.keys.extend(staged);
        if !owned.is_empty() {
            next.units.insert(unit.to_string(), owned);
        }
        *guard = Arc::new(next);

        info!(unit = %unit, commands = count, replaced, "Loaded command unit");
        Ok(count)
    }

    /// Remove every descriptor `unit` contributed. Returns how many were removed.
    pub fn unload(&self, unit: &str) -> usize {
        let mut guard = self.table.write();
        if !guard.units.contains_key(unit) {
            return 0;
        }
        let mut next = CommandTable::clone(&guard);
        let removed = next.remove_unit(unit);
        *guard = Arc::new(next);

        info!(unit = %unit, commands = removed, "Unloaded command unit");
        removed
    }

    /// Remove all commands.
    pub fn clear(&self) {
        *self.table.write() = Arc::new(CommandTable::default());
        info!("Cleared command registry");
    }

    /// Load every unit file directly under `dir` (no recursion).
    ///
    /// Hidden files, directories, files with the reserved prefix, and files
    /// with another extension are skipped. Each file is its own unit, keyed
    /// by its path.
    pub fn load_directory(
        &self,
        dir: &Path,
        loader: &UnitLoader,
        policy: LoadPolicy,
    ) -> Result<LoadReport> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            ChattermError::Config(format!(
                "Failed to read commands directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && loader.is_unit_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            let unit = loader.unit_id(&path);
            let result = loader
                .load_file(&path)
                .and_then(|descriptors| self.load(&unit, descriptors));

            match result {
                Ok(_) => report.loaded.push(unit),
                Err(e) if policy == LoadPolicy::FailFast => {
                    error!(unit = %unit, error = %e, "Failed to load command unit");
                    return Err(e);
                }
                Err(e) => {
                    warn!(unit = %unit, error = %e, "Failed to load command unit, skipping");
                    report.failed.push((unit, e.to_string()));
                }
            }
        }

        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Loaded commands directory"
        );
        Ok(report)
    }
}
