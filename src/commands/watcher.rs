//! Live reload of command units.
//!
//! The watcher observes the commands directory (not recursively) and keeps
//! the registry in step with it: a created or modified unit file is
//! (re)loaded, a deleted one is unloaded. Moves are only logged, since a
//! rename shows up as two unrelated halves and acting on either alone is
//! unsafe.
//!
//! Every failed reaction is logged and also sent on the error channel
//! returned by [`ModuleWatcher::new`]; the watch loop itself keeps running.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{ChattermError, Result};

use super::loader::UnitLoader;
use super::registry::CommandRegistry;

/// Kind of filesystem change, reduced to what the watcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
    /// The file was renamed; `to` is the new path when the platform
    /// reports both halves together.
    Moved { to: Option<PathBuf> },
}

/// One change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Lifecycle of a [`ModuleWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    Reacting,
    Stopped,
}

/// What the watcher did about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The unit was (re)loaded with this many commands.
    Loaded(usize),
    /// The unit was unloaded; this many commands were removed.
    Unloaded(usize),
    /// Nothing to do.
    Ignored,
}

struct Reactor {
    dir: PathBuf,
    registry: Arc<CommandRegistry>,
    loader: UnitLoader,
    state: Mutex<WatcherState>,
}

impl Reactor {
    fn react(&self, event: &WatchEvent) -> Result<Reaction> {
        if !self.is_watched(&event.path) {
            debug!(path = %event.path.display(), "Ignoring change outside commands directory");
            return Ok(Reaction::Ignored);
        }

        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, WatcherState::Reacting)
        };
        let result = self.apply(event);
        {
            let mut state = self.state.lock();
            // stop() may have run meanwhile
            if *state == WatcherState::Reacting {
                *state = previous;
            }
        }
        result
    }

    fn apply(&self, event: &WatchEvent) -> Result<Reaction> {
        let unit = self.loader.unit_id(&event.path);
        match &event.kind {
            WatchEventKind::Created | WatchEventKind::Modified => {
                if !event.path.is_file() {
                    return Ok(Reaction::Ignored);
                }
                let descriptors = self.loader.load_file(&event.path)?;
                let count = self.registry.load(&unit, descriptors)?;
                info!(unit = %unit, commands = count, kind = ?event.kind, "Reloaded command unit");
                Ok(Reaction::Loaded(count))
            }
            WatchEventKind::Deleted => {
                let removed = self.registry.unload(&unit);
                info!(unit = %unit, commands = removed, "Command unit deleted");
                Ok(Reaction::Unloaded(removed))
            }
            WatchEventKind::Moved { to } => {
                info!(
                    from = %event.path.display(),
                    to = ?to,
                    "Command unit moved, not reloading"
                );
                Ok(Reaction::Ignored)
            }
        }
    }

    /// Unit files directly inside the watched directory.
    fn is_watched(&self, path: &Path) -> bool {
        if !self.loader.is_unit_file(path) {
            return false;
        }
        let Some(parent) = path.parent() else {
            return false;
        };
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        canonical(parent) == canonical(&self.dir)
    }
}

/// Watches the commands directory and applies changes to the registry.
pub struct ModuleWatcher {
    reactor: Arc<Reactor>,
    errors: mpsc::UnboundedSender<ChattermError>,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl ModuleWatcher {
    /// Create an idle watcher and the receiving end of its error channel.
    pub fn new(
        dir: impl Into<PathBuf>,
        registry: Arc<CommandRegistry>,
        loader: UnitLoader,
    ) -> (Self, mpsc::UnboundedReceiver<ChattermError>) {
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            reactor: Arc::new(Reactor {
                dir: dir.into(),
                registry,
                loader,
                state: Mutex::new(WatcherState::Idle),
            }),
            errors,
            watcher: None,
            task: None,
        };
        (watcher, errors_rx)
    }

    pub fn state(&self) -> WatcherState {
        *self.reactor.state.lock()
    }

    pub fn dir(&self) -> &Path {
        &self.reactor.dir
    }

    /// React to one event. Used by the watch loop; callable directly to
    /// replay changes.
    pub fn handle_event(&self, event: &WatchEvent) -> Result<Reaction> {
        self.reactor.react(event)
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        if *self.reactor.state.lock() == WatcherState::Stopped {
            return Err(ChattermError::Watch("watcher already stopped".to_string()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher
            .watch(&self.reactor.dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ChattermError::Watch(format!(
                    "Failed to watch {}: {}",
                    self.reactor.dir.display(),
                    e
                ))
            })?;

        let reactor = Arc::clone(&self.reactor);
        let errors = self.errors.clone();
        let task = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) => {
                        for change in map_event(&event) {
                            if let Err(e) = reactor.react(&change) {
                                error!(
                                    path = %change.path.display(),
                                    kind = ?change.kind,
                                    error = %e,
                                    "Failed to react to command unit change"
                                );
                                let _ = errors.send(e);
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Filesystem watch error");
                        let _ = errors.send(ChattermError::Notify(e));
                    }
                }
            }
            debug!("Watch loop finished");
        });

        self.watcher = Some(watcher);
        self.task = Some(task);
        *self.reactor.state.lock() = WatcherState::Watching;
        info!(dir = %self.reactor.dir.display(), "Watching commands directory");
        Ok(())
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the notify watcher closes the event channel
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut state = self.reactor.state.lock();
        if *state != WatcherState::Stopped {
            *state = WatcherState::Stopped;
            info!(dir = %self.reactor.dir.display(), "Stopped watching commands directory");
        }
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reduce a notify event to the changes the watcher understands.
pub fn map_event(event: &notify::Event) -> Vec<WatchEvent> {
    let kind = match &event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            return vec![WatchEvent::new(
                WatchEventKind::Moved {
                    to: Some(event.paths[1].clone()),
                },
                event.paths[0].clone(),
            )];
        }
        EventKind::Modify(ModifyKind::Name(_)) => WatchEventKind::Moved { to: None },
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Remove(_) => WatchEventKind::Deleted,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|p| WatchEvent::new(kind.clone(), p.clone()))
        .collect()
}
