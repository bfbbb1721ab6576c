//! File system watcher feeding the coordinator.
//!
//! Watches the project directory, drops ignored and hidden paths, and turns
//! bursts of change events into [`HmrCoordinator::trigger_update`] calls.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fob_config::WatchConfig;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::coordinator::HmrCoordinator;
use crate::error::{HmrError, Result};

/// File change event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    /// Get the path affected by this change.
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, FileChange::Removed(_))
    }
}

/// Recursive watcher with debouncing and filtering.
///
/// Events stop when the watcher is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`.
    ///
    /// # Errors
    ///
    /// Returns [`HmrError::FileNotFound`] if `root` does not exist, or a watch
    /// error if the platform watcher cannot be created.
    pub fn new(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        if !root.exists() {
            return Err(HmrError::FileNotFound(root));
        }

        let (tx, rx) = mpsc::channel(100);

        let debounce_duration = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };

            for path in &event.paths {
                if Self::should_ignore(path, &watch_root, &ignore_patterns) {
                    continue;
                }

                // Same file again within the debounce window
                let now = Instant::now();
                let repeated = last_event.as_ref().is_some_and(|(last_path, last_time)| {
                    last_path == path && now.duration_since(*last_time) < debounce_duration
                });
                if repeated {
                    continue;
                }
                last_event = Some((path.clone(), now));

                let change = match event.kind {
                    notify::EventKind::Create(_) => FileChange::Created(path.clone()),
                    notify::EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    notify::EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };

                let _ = tx.blocking_send(change);
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching for changes");

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    /// Start watching with the configured ignore list and debounce.
    pub fn from_config(
        root: PathBuf,
        config: &WatchConfig,
    ) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        Self::new(root, config.ignore.clone(), config.debounce_ms)
    }

    /// Check if a path should be ignored.
    ///
    /// Paths outside `root`, hidden files and directories, and paths matching
    /// a directory or `*.ext` pattern are ignored.
    fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
        let Ok(rel_path) = path.strip_prefix(root) else {
            return true;
        };

        let path_str = rel_path.to_string_lossy();

        for pattern in ignore_patterns {
            if let Some(ext) = pattern.strip_prefix('*') {
                if path_str.ends_with(ext) {
                    return true;
                }
            } else if path_str.starts_with(pattern.as_str())
                || path_str.contains(&format!("/{}", pattern))
            {
                return true;
            }
        }

        rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
        })
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Module path the compiler knows a file by: relative to `root`, `/`-separated.
pub fn module_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Forward file changes to the coordinator until the channel closes.
///
/// Events already waiting in the channel are grouped into one trigger.
/// Removed files are always forced through, since the compiler may no
/// longer report them as known modules.
pub async fn forward_changes(
    mut rx: mpsc::Receiver<FileChange>,
    coordinator: HmrCoordinator,
    root: PathBuf,
) {
    while let Some(first) = rx.recv().await {
        let mut changes = vec![first];
        while let Ok(change) = rx.try_recv() {
            changes.push(change);
        }

        let (removed, changed): (Vec<_>, Vec<_>) =
            changes.into_iter().partition(FileChange::is_removal);

        let changed: Vec<String> = changed
            .iter()
            .map(|change| module_path(change.path(), &root))
            .collect();
        let removed: Vec<String> = removed
            .iter()
            .map(|change| module_path(change.path(), &root))
            .collect();

        debug!(changed = ?changed, removed = ?removed, "file changes");

        if !changed.is_empty() {
            coordinator.trigger_update(changed, false);
        }
        if !removed.is_empty() {
            coordinator.trigger_update(removed, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore_node_modules() {
        let root = PathBuf::from("/project");
        let patterns = vec!["node_modules".to_string()];

        let path = PathBuf::from("/project/node_modules/package/index.js");
        assert!(FileWatcher::should_ignore(&path, &root, &patterns));

        let path = PathBuf::from("/project/src/index.js");
        assert!(!FileWatcher::should_ignore(&path, &root, &patterns));
    }

    #[test]
    fn test_should_ignore_extension() {
        let root = PathBuf::from("/project");
        let patterns = vec!["*.log".to_string()];

        let path = PathBuf::from("/project/debug.log");
        assert!(FileWatcher::should_ignore(&path, &root, &patterns));

        let path = PathBuf::from("/project/src/index.js");
        assert!(!FileWatcher::should_ignore(&path, &root, &patterns));
    }

    #[test]
    fn test_should_ignore_hidden_and_outside_root() {
        let root = PathBuf::from("/project");
        let patterns = vec![];

        assert!(FileWatcher::should_ignore(
            Path::new("/project/.env"),
            &root,
            &patterns
        ));
        assert!(FileWatcher::should_ignore(
            Path::new("/project/src/.hidden/file.js"),
            &root,
            &patterns
        ));
        assert!(FileWatcher::should_ignore(
            Path::new("/other/file.js"),
            &root,
            &patterns
        ));
    }

    #[test]
    fn test_module_path_is_relative() {
        let root = PathBuf::from("/project");
        assert_eq!(
            module_path(Path::new("/project/src/pages/home.tsx"), &root),
            "src/pages/home.tsx"
        );
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let result = FileWatcher::new(PathBuf::from("/definitely/not/here"), vec![], 50);
        assert!(matches!(result, Err(HmrError::FileNotFound(_))));
    }
}
