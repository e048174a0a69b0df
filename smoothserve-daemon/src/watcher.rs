use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{DaemonError, Result};

/// Message sent when a watched file changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub service_name: String,
    pub paths: Vec<PathBuf>,
}

/// Keeps the OS watch registrations alive. Dropping it stops delivery and
/// closes the change channel.
pub struct FileWatcher {
    service_name: String,
    paths: Vec<PathBuf>,
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("service_name", &self.service_name)
            .field("paths", &self.paths)
            .finish()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        debug!("Stopping file watcher for {}", self.service_name);
    }
}

/// Whether a notification describes something that should trigger a
/// restart. Pure reads are ignored so that exec'ing a watched binary
/// does not restart the service it just started.
fn is_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Watch every path in `paths` and forward each change to `change_tx`.
///
/// Either all paths are registered or none are: the first registration
/// failure is returned and the partial watcher is dropped.
pub fn watch_files(
    service_name: &str,
    paths: Vec<PathBuf>,
    change_tx: mpsc::UnboundedSender<FileChangeEvent>,
) -> Result<FileWatcher> {
    let name = service_name.to_string();
    let first_path = paths.first().cloned().unwrap_or_default();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) if is_change(&event.kind) => {
                debug!("File change for {}: {:?} {:?}", name, event.kind, event.paths);
                let _ = change_tx.send(FileChangeEvent {
                    service_name: name.clone(),
                    paths: event.paths,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("File watcher error for {}: {}", name, e),
        }
    })
    .map_err(|source| DaemonError::Watcher {
        service: service_name.to_string(),
        path: first_path,
        source,
    })?;

    for path in &paths {
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| DaemonError::Watcher {
                service: service_name.to_string(),
                path: path.clone(),
                source,
            })?;
    }

    info!("Watching {:?} for {}", paths, service_name);

    Ok(FileWatcher {
        service_name: service_name.to_string(),
        paths,
        _watcher: watcher,
    })
}
