//! Snapshot creation, full and incremental.
//!
//! Every persisted snapshot is complete: incremental tracking re-extracts only
//! the changed files plus their dependents, then merges into the previous
//! snapshot's ASTs and rebuilds the graph from the merged set.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::git::GitIntegration;
use crate::graph::DependencyMapper;
use crate::index::{AstSnapshot, BlobStore, DependencyGraph, FileMetadata, Snapshot, SnapshotMetadata};
use crate::indexer::{relative_path, AstExtractor, FileWalker, HashManager, IgnoreRules, Indexer};
use crate::languages::LanguageRegistry;
use crate::snapshot::manager::{id_timestamp, SnapshotManager};

/// Files reached from a change set through reverse dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSet {
    /// Dependents of the changed files, excluding the changed files themselves
    pub impacted: BTreeSet<String>,
    /// Dependents that were already on the traversal path when reached
    pub circular: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackOutcome {
    pub snapshot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// True when no prior snapshot existed and a full scan ran
    pub full_scan: bool,
    /// False when nothing changed and the previous snapshot was reused
    pub created: bool,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub impacted: Vec<String>,
    pub circular: Vec<String>,
}

pub struct ChangeTracker {
    root: PathBuf,
    store: Arc<dyn BlobStore>,
    indexer: Indexer,
    extractor: AstExtractor,
    mapper: DependencyMapper,
    snapshots: SnapshotManager,
    git: Option<GitIntegration>,
    max_depth: usize,
}

impl ChangeTracker {
    pub fn new(
        root: impl AsRef<Path>,
        store: Arc<dyn BlobStore>,
        config: &EngineConfig,
        registry: LanguageRegistry,
    ) -> Self {
        let root = root.as_ref().to_path_buf();
        let rules = IgnoreRules::new(&config.ignore_dirs).with_gitignore(&root);
        let walker = FileWalker::with_rules(registry.clone(), rules);
        let hashes = HashManager::new(Arc::clone(&store), config.hash_algorithm);

        let git = match GitIntegration::open(&root) {
            Ok(git) => Some(git),
            Err(e) => {
                tracing::debug!("No git provenance for {}: {}", root.display(), e);
                None
            }
        };

        Self {
            indexer: Indexer::new(&root, Arc::clone(&store), walker, hashes),
            extractor: AstExtractor::new(registry),
            mapper: DependencyMapper::new(Arc::clone(&store)).with_max_depth(config.max_traversal_depth),
            snapshots: SnapshotManager::new(
                Arc::clone(&store),
                config.retention.clone(),
                config.compress_after_hours,
            ),
            root,
            store,
            git,
            max_depth: config.max_traversal_depth,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn mapper_mut(&mut self) -> &mut DependencyMapper {
        &mut self.mapper
    }

    /// Rebuilds the file index only; returns the tracked file count
    pub fn scan(&mut self) -> Result<usize> {
        Ok(self.indexer.scan_project()?.len())
    }

    /// Full scan, full extraction, new snapshot
    pub fn create_snapshot(&mut self) -> Result<Snapshot> {
        let files = self.indexer.scan_project()?.clone();
        let asts = self.extract_all(&files);

        for ast in asts.values() {
            AstExtractor::save(self.store.as_ref(), ast)?;
        }
        self.remove_stale_asts(&files)?;

        let snapshot = self.finish_snapshot(files, asts)?;
        tracing::info!(
            "Created snapshot {}: {} files, {} dependency edges, {} cycles",
            snapshot.id,
            snapshot.files.len(),
            snapshot.graph.edge_count(),
            snapshot.graph.cycles.len()
        );
        Ok(snapshot)
    }

    /// Incremental snapshot for a batch of changed paths.
    ///
    /// Falls back to [`create_snapshot`](Self::create_snapshot) when there is
    /// no readable previous snapshot. A batch that changes nothing reuses the
    /// previous snapshot instead of writing a new one.
    pub fn track_incremental_changes(&mut self, changed: &[PathBuf]) -> Result<TrackOutcome> {
        let Some(previous) = self.snapshots.latest()? else {
            tracing::info!("No previous snapshot, running a full scan");
            let snapshot = self.create_snapshot()?;
            return Ok(TrackOutcome {
                snapshot_id: snapshot.id,
                previous_id: None,
                full_scan: true,
                created: true,
                updated: snapshot.files.keys().cloned().collect(),
                removed: Vec::new(),
                impacted: Vec::new(),
                circular: Vec::new(),
            });
        };

        let outcome = self.indexer.incremental_index(changed)?;
        if outcome.is_noop() {
            tracing::debug!("No content changes, keeping snapshot {}", previous.id);
            return Ok(TrackOutcome {
                snapshot_id: previous.id.clone(),
                previous_id: Some(previous.id),
                full_scan: false,
                created: false,
                updated: Vec::new(),
                removed: Vec::new(),
                impacted: Vec::new(),
                circular: Vec::new(),
            });
        }

        let seeds: Vec<String> = outcome.changed().cloned().collect();
        let impact = compute_impact_set(&previous.graph, &seeds, self.max_depth);

        let files = self.indexer.files().clone();
        let mut asts = previous.asts.clone();
        for path in &outcome.removed {
            asts.remove(path);
            AstExtractor::delete(self.store.as_ref(), path)?;
        }

        let to_extract: BTreeMap<String, FileMetadata> = outcome
            .updated
            .iter()
            .chain(impact.impacted.iter())
            .filter_map(|p| files.get(p).map(|m| (p.clone(), m.clone())))
            .collect();
        for (path, ast) in self.extract_all(&to_extract) {
            AstExtractor::save(self.store.as_ref(), &ast)?;
            asts.insert(path, ast);
        }
        asts.retain(|path, _| files.contains_key(path));

        let snapshot = self.finish_snapshot(files, asts)?;
        tracing::info!(
            "Created snapshot {} incrementally: {} updated, {} removed, {} impacted ({} circular)",
            snapshot.id,
            outcome.updated.len(),
            outcome.removed.len(),
            impact.impacted.len(),
            impact.circular.len()
        );

        Ok(TrackOutcome {
            snapshot_id: snapshot.id,
            previous_id: Some(previous.id),
            full_scan: false,
            created: true,
            updated: outcome.updated,
            removed: outcome.removed,
            impacted: impact.impacted.into_iter().collect(),
            circular: impact.circular.into_iter().collect(),
        })
    }

    /// In-memory state of the working tree; nothing is persisted
    pub fn preview_working_tree(&self) -> Result<Snapshot> {
        let walker = self.indexer.walker();
        let hashes = self.indexer.hashes();
        let now = chrono::Utc::now().timestamp_millis();

        let mut files = BTreeMap::new();
        for path in walker.walk(&self.root)? {
            let Some(rel) = relative_path(&self.root, &path) else {
                continue;
            };
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let line_count = String::from_utf8_lossy(&data).lines().count();
            files.insert(
                rel.clone(),
                FileMetadata {
                    path: rel,
                    hash: hashes.hash_content(&data),
                    size: data.len() as u64,
                    line_count,
                    language: walker.get_language(&path).unwrap_or_else(|| "unknown".to_string()),
                    last_modified: 0,
                    indexed_at: now,
                },
            );
        }

        let asts = self.extract_all(&files);
        let graph = self.mapper.build_graph(&asts);
        Ok(Snapshot {
            id: "working-tree".to_string(),
            timestamp: now,
            files,
            asts,
            graph,
        })
    }

    fn extract_all(&self, files: &BTreeMap<String, FileMetadata>) -> BTreeMap<String, AstSnapshot> {
        let entries: Vec<(&String, &FileMetadata)> = files.iter().collect();
        entries
            .par_iter()
            .map(|(path, meta)| {
                let ast = self.extractor.extract_file(&self.root, path, &meta.hash);
                if !ast.parse_errors.is_empty() {
                    tracing::debug!("{}: {} parse errors", path, ast.parse_errors.len());
                }
                ((*path).clone(), ast)
            })
            .collect()
    }

    fn remove_stale_asts(&self, files: &BTreeMap<String, FileMetadata>) -> Result<()> {
        let Some(previous) = self.snapshots.latest()? else {
            return Ok(());
        };
        for path in previous.asts.keys().filter(|p| !files.contains_key(*p)) {
            AstExtractor::delete(self.store.as_ref(), path)?;
        }
        Ok(())
    }

    fn finish_snapshot(
        &mut self,
        files: BTreeMap<String, FileMetadata>,
        asts: BTreeMap<String, AstSnapshot>,
    ) -> Result<Snapshot> {
        let graph: DependencyGraph = self.mapper.build_graph(&asts);
        self.mapper.save_graph(&graph)?;

        // ids must keep sorting after the latest one, even within one millisecond
        let floor = self
            .snapshots
            .list_ids()?
            .last()
            .and_then(|id| id_timestamp(id))
            .map_or(0, |t| t + 1);
        let timestamp = chrono::Utc::now().timestamp_millis().max(floor);
        let snapshot = Snapshot {
            id: Snapshot::generate_id(timestamp),
            timestamp,
            files,
            asts,
            graph,
        };
        self.snapshots.save(&snapshot)?;
        self.record_provenance(&snapshot.id);
        Ok(snapshot)
    }

    fn record_provenance(&self, snapshot_id: &str) {
        let Some(git) = &self.git else {
            return;
        };
        let commit = match git.head_commit() {
            Ok(commit) => commit,
            Err(e) => {
                tracing::debug!("No commit recorded for {}: {}", snapshot_id, e);
                return;
            }
        };
        let mut metadata = SnapshotMetadata::new(snapshot_id);
        metadata.commit = Some(commit);
        if let Err(e) = self.snapshots.save_metadata(&metadata) {
            tracing::warn!("Failed to record commit for {}: {}", snapshot_id, e);
        }
    }
}

/// Reverse-dependency BFS from `changed` over `graph`.
///
/// A dependent that already lies on the path leading to the current file is
/// recorded as circular and not expanded again.
pub fn compute_impact_set(graph: &DependencyGraph, changed: &[String], max_depth: usize) -> ImpactSet {
    let mut result = ImpactSet::default();
    let seeds: BTreeSet<&str> = changed.iter().map(String::as_str).collect();

    // file -> the file it was first reached from
    let mut parent: HashMap<&str, Option<&str>> = HashMap::new();
    let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
    for &seed in &seeds {
        parent.insert(seed, None);
        queue.push_back((seed, 0));
    }

    while let Some((file, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for dependent in graph.dependents_of(file) {
            let dependent = dependent.as_str();
            if on_path(&parent, file, dependent) {
                result.circular.insert(dependent.to_string());
                if !seeds.contains(dependent) {
                    result.impacted.insert(dependent.to_string());
                }
                continue;
            }
            if parent.contains_key(dependent) {
                continue;
            }
            parent.insert(dependent, Some(file));
            if !seeds.contains(dependent) {
                result.impacted.insert(dependent.to_string());
            }
            queue.push_back((dependent, depth + 1));
        }
    }

    result
}

fn on_path<'a>(parent: &HashMap<&'a str, Option<&'a str>>, from: &'a str, target: &str) -> bool {
    let mut cursor = Some(from);
    while let Some(node) = cursor {
        if node == target {
            return true;
        }
        cursor = parent.get(node).copied().flatten();
    }
    false
}
