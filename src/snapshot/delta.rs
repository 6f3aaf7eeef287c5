//! Compact snapshot-to-snapshot deltas for storage and transport.
//!
//! Live state is always a full [`Snapshot`]; a delta only exists to be shipped
//! or archived and is turned back into a full snapshot with
//! [`SnapshotDiffEngine::apply`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};
use crate::index::{AstSnapshot, DependencyGraph, FileMetadata, Snapshot};

/// New state of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<AstSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDelta {
    pub from_id: String,
    pub to_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub added: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub modified: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub removed: Vec<String>,
    /// Present only when the graph changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<DependencyGraph>,
}

impl SnapshotDelta {
    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0 && self.graph.is_none()
    }
}

#[derive(Debug, Default)]
pub struct SnapshotDiffEngine;

impl SnapshotDiffEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn diff(&self, from: &Snapshot, to: &Snapshot) -> SnapshotDelta {
        let from_paths = paths(from);
        let to_paths = paths(to);

        let mut delta = SnapshotDelta {
            from_id: from.id.clone(),
            to_id: to.id.clone(),
            timestamp: to.timestamp,
            added: BTreeMap::new(),
            modified: BTreeMap::new(),
            removed: Vec::new(),
            graph: (from.graph != to.graph).then(|| to.graph.clone()),
        };

        for path in &to_paths {
            let entry = FileEntry {
                metadata: to.files.get(*path).cloned(),
                ast: to.asts.get(*path).cloned(),
            };
            if !from_paths.contains(path) {
                delta.added.insert(path.to_string(), entry);
            } else if from.files.get(*path) != entry.metadata.as_ref() || from.asts.get(*path) != entry.ast.as_ref() {
                delta.modified.insert(path.to_string(), entry);
            }
        }

        delta.removed = from_paths
            .difference(&to_paths)
            .map(|p| p.to_string())
            .collect();

        tracing::debug!(
            "Delta {} -> {}: +{} ~{} -{}",
            delta.from_id,
            delta.to_id,
            delta.added.len(),
            delta.modified.len(),
            delta.removed.len()
        );
        delta
    }

    /// Rebuilds the target snapshot from its base
    pub fn apply(&self, base: &Snapshot, delta: &SnapshotDelta) -> Result<Snapshot> {
        if base.id != delta.from_id {
            return Err(ImpactError::Storage(format!(
                "Delta expects base {}, got {}",
                delta.from_id, base.id
            )));
        }

        let mut files = base.files.clone();
        let mut asts = base.asts.clone();

        for path in &delta.removed {
            files.remove(path);
            asts.remove(path);
        }
        for (path, entry) in delta.added.iter().chain(delta.modified.iter()) {
            match &entry.metadata {
                Some(meta) => files.insert(path.clone(), meta.clone()),
                None => files.remove(path),
            };
            match &entry.ast {
                Some(ast) => asts.insert(path.clone(), ast.clone()),
                None => asts.remove(path),
            };
        }

        Ok(Snapshot {
            id: delta.to_id.clone(),
            timestamp: delta.timestamp,
            files,
            asts,
            graph: delta.graph.clone().unwrap_or_else(|| base.graph.clone()),
        })
    }
}

fn paths(snapshot: &Snapshot) -> BTreeSet<&str> {
    snapshot
        .files
        .keys()
        .chain(snapshot.asts.keys())
        .map(String::as_str)
        .collect()
}
