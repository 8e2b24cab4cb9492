//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a new file and renaming it are picked up too.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::SwitcherConfig;
use crate::observability::logging::error_chain;

/// Reloads the configuration file whenever it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<SwitcherConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the stream of validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<SwitcherConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Dropping the returned handle stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event, file_name.as_ref()) => self.reload(),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching configuration file");
        Ok(watcher)
    }

    /// Load the file and forward it if valid; invalid files keep the
    /// running configuration.
    fn reload(&self) {
        match load_config(&self.path) {
            Ok(config) => {
                tracing::info!(path = %self.path.display(), "Configuration file changed, reloading");
                let _ = self.updates.send(config);
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %error_chain(&e),
                    "Ignoring invalid configuration file"
                );
            }
        }
    }
}

fn is_relevant(event: &Event, file_name: Option<&OsString>) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()).as_ref() == file_name)
}
