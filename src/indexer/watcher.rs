use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};

use crate::error::{ImpactError, Result};
use crate::indexer::walker::{relative_path, FileWalker};

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
        }
    }
}

type EventBatch = std::result::Result<Vec<DebouncedEvent>, notify::Error>;

/// Debounced recursive watcher over a project root.
///
/// Only events for files the walker would index are surfaced.
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<EventBatch>,
    root: PathBuf,
    walker: FileWalker,
}

impl FileWatcher {
    pub fn new(root: &Path, walker: FileWalker, debounce: Duration) -> Result<Self> {
        let (tx, rx) = channel();

        let mut debouncer =
            new_debouncer(debounce, tx).map_err(|e| ImpactError::Watcher(e.to_string()))?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| ImpactError::Watcher(e.to_string()))?;

        Ok(Self {
            _debouncer: debouncer,
            receiver: rx,
            root: root.to_path_buf(),
            walker,
        })
    }

    /// Blocks for the next batch; `None` once the watcher is gone
    pub fn recv(&self) -> Option<Vec<FileEvent>> {
        loop {
            match self.receiver.recv() {
                Ok(batch) => {
                    let events = self.translate(batch);
                    if !events.is_empty() {
                        return Some(events);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<FileEvent>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => {
                let events = self.translate(batch);
                Ok((!events.is_empty()).then_some(events))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ImpactError::Watcher("watcher channel closed".to_string()))
            }
        }
    }

    fn translate(&self, batch: EventBatch) -> Vec<FileEvent> {
        let events = match batch {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Watcher error: {}", e);
                return Vec::new();
            }
        };

        let mut out: Vec<FileEvent> = events
            .into_iter()
            .filter_map(|e| classify(&self.root, &self.walker, e.path))
            .collect();
        out.sort_by(|a, b| a.path().cmp(b.path()));
        out.dedup();
        out
    }
}

fn classify(root: &Path, walker: &FileWalker, path: PathBuf) -> Option<FileEvent> {
    let rel = relative_path(root, &path)?;
    if !walker.is_tracked(&rel) {
        return None;
    }
    if path.is_file() {
        Some(FileEvent::Modified(path))
    } else if !path.exists() {
        Some(FileEvent::Deleted(path))
    } else {
        None
    }
}
