//! The analysis engine: one explicitly constructed instance per project root.
//!
//! Mutating entry points are [`Engine::scan`], [`Engine::create_snapshot`],
//! [`Engine::analyze`] and the snapshot maintenance calls. Everything else is
//! a read-only query over persisted state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::advisory::{AdvisoryProvider, AdvisoryReport, AdvisoryStore};
use crate::config::EngineConfig;
use crate::diff::{AstDiffEngine, BreakingChangeDetector};
use crate::error::{ImpactError, Result};
use crate::git::{ChangedFile, GitIntegration};
use crate::events::{EventBus, EventSubscriber, FileChange, ImpactEvent, Subscription};
use crate::graph::{
    calculate_dependency_strength, find_strongly_connected_components, CodePropertyGraph, CpgNode,
    FileImpact, ImpactAnalyzer, ImpactOptions, ImpactResult,
};
use crate::index::{AstSnapshot, BlobStore, ChangeReport, DependencyGraph, FileMetadata, FsStore, Snapshot, SnapshotMetadata};
use crate::indexer::{relative_path, AstExtractor};
use crate::snapshot::{
    ChangeTracker, MaintenanceReport, Page, SnapshotDelta, SnapshotDiffEngine, SnapshotSummary, TrackOutcome,
    TrendAnalyzer, TrendReport,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub root: String,
    pub tracked_files: usize,
    pub snapshot_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_snapshot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub outcome: TrackOutcome,
    /// Changes against the previous snapshot; empty when none was created
    pub reports: Vec<ChangeReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDetails {
    pub metadata: FileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast: Option<AstSnapshot>,
}

/// What returning the working tree to a snapshot would take
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePreview {
    pub snapshot_id: String,
    /// In the snapshot, missing from the tree
    pub added: Vec<String>,
    /// In the tree, missing from the snapshot
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    store: Arc<dyn BlobStore>,
    tracker: ChangeTracker,
    impact: ImpactAnalyzer,
    detector: BreakingChangeDetector,
    deltas: SnapshotDiffEngine,
    trends: TrendAnalyzer,
    advisories: AdvisoryStore,
    events: EventBus,
    /// Property graph of the snapshot whose id it is keyed by
    cpg: Option<(String, CodePropertyGraph)>,
}

impl Engine {
    /// Discovers `.code-impact.toml` under `root` and stores state on disk
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let config = EngineConfig::discover(root.as_ref())?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(root: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let store = FsStore::new(config.storage_path(root.as_ref()))?;
        Ok(Self::with_store(root, config, Arc::new(store)))
    }

    pub fn with_store(root: impl AsRef<Path>, config: EngineConfig, store: Arc<dyn BlobStore>) -> Self {
        let root = root.as_ref().to_path_buf();
        let tracker = ChangeTracker::new(&root, Arc::clone(&store), &config, crate::REGISTRY.clone());

        Self {
            impact: ImpactAnalyzer::new(config.impact_weights, config.max_traversal_depth),
            detector: BreakingChangeDetector::new(AstDiffEngine::new(config.control_flow_edit_weight)),
            deltas: SnapshotDiffEngine::new(),
            trends: TrendAnalyzer::new(),
            advisories: AdvisoryStore::new(Arc::clone(&store)),
            events: EventBus::default(),
            cpg: None,
            root,
            config,
            store,
            tracker,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self, subscription: Subscription) -> EventSubscriber {
        self.events.subscribe(subscription)
    }

    pub fn health(&self) -> Result<Health> {
        let ids = self.tracker.snapshots().list_ids()?;
        Ok(Health {
            status: "ok".to_string(),
            root: self.root.display().to_string(),
            tracked_files: self.tracker.indexer().files().len(),
            snapshot_count: ids.len(),
            latest_snapshot: ids.last().cloned(),
        })
    }

    // =====================================================
    // Mutating operations
    // =====================================================

    pub fn scan(&mut self) -> Result<usize> {
        self.tracker.scan()
    }

    pub fn create_snapshot(&mut self) -> Result<Snapshot> {
        let snapshot = self.tracker.create_snapshot()?;
        self.events.publish(ImpactEvent::SnapshotCreated {
            snapshot_id: snapshot.id.clone(),
            file_count: snapshot.files.len(),
        });
        Ok(snapshot)
    }

    /// Incremental analysis of one batch of changed paths.
    ///
    /// Batches must not overlap; callers serialize them.
    pub fn analyze(&mut self, changed: &[PathBuf]) -> Result<AnalysisResult> {
        for path in changed {
            let abs = if path.is_absolute() { path.clone() } else { self.root.join(path) };
            let Some(rel) = relative_path(&self.root, &abs) else {
                continue;
            };
            let change = if abs.is_file() {
                FileChange::Modified
            } else {
                FileChange::Removed
            };
            self.events.publish(ImpactEvent::FileChanged { path: rel, change });
        }

        let outcome = self.tracker.track_incremental_changes(changed)?;
        if !outcome.created {
            return Ok(AnalysisResult {
                outcome,
                reports: Vec::new(),
            });
        }

        let current = self.tracker.snapshots().load(&outcome.snapshot_id)?;
        self.events.publish(ImpactEvent::SnapshotCreated {
            snapshot_id: current.id.clone(),
            file_count: current.files.len(),
        });

        let reports = match &outcome.previous_id {
            Some(previous_id) => {
                let previous = self.tracker.snapshots().load(previous_id)?;
                let cpg = CodePropertyGraph::build(&current.asts, &current.graph);
                let reports = self.detector.detect_breaking_changes(&previous, &current, Some(&cpg));
                for report in reports.iter().filter(|r| r.is_breaking()) {
                    self.events.publish(ImpactEvent::BreakingChangeDetected {
                        file_path: report.file_path.clone(),
                        risk_level: report.risk_level,
                        risk_score: report.risk_score,
                        snapshot_id: current.id.clone(),
                    });
                }
                self.cpg = Some((current.id.clone(), cpg));
                reports
            }
            None => Vec::new(),
        };

        Ok(AnalysisResult { outcome, reports })
    }

    pub fn tag(&self, id: &str, tags: &[String], description: Option<String>) -> Result<SnapshotMetadata> {
        self.tracker.snapshots().tag(id, tags, description)
    }

    pub fn export_snapshot(&self, id: &str, dest: &Path) -> Result<()> {
        self.tracker.snapshots().export(id, dest)
    }

    pub fn import_snapshot(&self, src: &Path) -> Result<String> {
        self.tracker.snapshots().import(src)
    }

    /// Retention then compression, relative to now
    pub fn maintain(&self) -> Result<MaintenanceReport> {
        self.tracker
            .snapshots()
            .maintain(chrono::Utc::now().timestamp_millis())
    }

    // =====================================================
    // Queries
    // =====================================================

    /// Current dependency graph, served from the mapper cache
    pub fn dependency_graph(&mut self) -> DependencyGraph {
        self.tracker
            .mapper_mut()
            .get_cached_graph()
            .cloned()
            .unwrap_or_default()
    }

    pub fn cycles(&mut self) -> Vec<Vec<String>> {
        self.dependency_graph().cycles
    }

    pub fn strongly_connected_components(&mut self) -> Vec<Vec<String>> {
        find_strongly_connected_components(&self.dependency_graph())
    }

    pub fn clusters(&mut self) -> std::collections::BTreeMap<String, Vec<String>> {
        let graph = self.dependency_graph();
        self.impact.cluster_modules(&graph, self.config.cluster_min_size)
    }

    pub fn dependency_strength(&mut self, a: &str, b: &str) -> f64 {
        calculate_dependency_strength(&self.dependency_graph(), a, b)
    }

    pub fn impact(&mut self, changed: &[String], use_dfs: bool) -> ImpactResult {
        let graph = self.dependency_graph();
        let options = ImpactOptions {
            use_dfs,
            ..ImpactOptions::default()
        };
        self.impact.analyze_impact_from_dependency_graph(&graph, changed, &options)
    }

    pub fn file_impact(&mut self, path: &str) -> Result<FileImpact> {
        let graph = self.dependency_graph();
        self.impact
            .file_impact(&graph, path)
            .ok_or_else(|| ImpactError::FileNotFound(path.to_string()))
    }

    pub fn file_details(&self, path: &str) -> Result<FileDetails> {
        let metadata = self
            .tracker
            .indexer()
            .get(path)
            .cloned()
            .ok_or_else(|| ImpactError::FileNotFound(path.to_string()))?;
        Ok(FileDetails {
            metadata,
            ast: AstExtractor::load(self.store.as_ref(), path),
        })
    }

    /// Latest snapshot against the working tree, without persisting anything.
    /// Empty when no snapshot exists yet.
    pub fn breaking_changes(&self) -> Result<Vec<ChangeReport>> {
        let Some(latest) = self.tracker.snapshots().latest()? else {
            tracing::warn!("No snapshot to compare against");
            return Ok(Vec::new());
        };
        let current = self.tracker.preview_working_tree()?;
        let cpg = CodePropertyGraph::build(&current.asts, &current.graph);
        Ok(self.detector.detect_breaking_changes(&latest, &current, Some(&cpg)))
    }

    pub fn compare(&self, from_id: &str, to_id: &str) -> Result<Vec<ChangeReport>> {
        let from = self.tracker.snapshots().load(from_id)?;
        let to = self.tracker.snapshots().load(to_id)?;
        Ok(self.detector.detect_breaking_changes(&from, &to, None))
    }

    pub fn delta(&self, from_id: &str, to_id: &str) -> Result<SnapshotDelta> {
        let from = self.tracker.snapshots().load(from_id)?;
        let to = self.tracker.snapshots().load(to_id)?;
        Ok(self.deltas.diff(&from, &to))
    }

    pub fn history(&self, offset: usize, limit: usize, tag: Option<&str>) -> Result<Page<SnapshotSummary>> {
        self.tracker.snapshots().list(offset, limit, tag)
    }

    pub fn snapshot(&self, id: &str) -> Result<Snapshot> {
        self.tracker.snapshots().load(id)
    }

    pub fn trend(&self) -> Result<TrendReport> {
        let snapshots = self.tracker.snapshots().load_all()?;
        Ok(self.trends.analyze(&snapshots))
    }

    /// Read-only: compares the snapshot with the working tree
    pub fn restore_preview(&self, id: &str) -> Result<RestorePreview> {
        let target = self.tracker.snapshots().load(id)?;
        let current = self.tracker.preview_working_tree()?;

        let mut preview = RestorePreview {
            snapshot_id: target.id.clone(),
            ..Default::default()
        };
        for (path, meta) in &target.files {
            match current.files.get(path) {
                None => preview.added.push(path.clone()),
                Some(now) if now.hash != meta.hash => preview.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        preview.removed = current
            .files
            .keys()
            .filter(|p| !target.files.contains_key(*p))
            .cloned()
            .collect();
        Ok(preview)
    }

    // =====================================================
    // Property graph
    // =====================================================

    /// Property graph of the latest snapshot, built on first use
    pub fn property_graph(&mut self) -> Result<&CodePropertyGraph> {
        let latest = self
            .tracker
            .snapshots()
            .latest()?
            .ok_or_else(|| ImpactError::SnapshotNotFound("latest".to_string()))?;
        Ok(self.property_graph_for(&latest))
    }

    fn property_graph_for(&mut self, snapshot: &Snapshot) -> &CodePropertyGraph {
        if self.cpg.as_ref().is_some_and(|(id, _)| id != &snapshot.id) {
            self.cpg = None;
        }
        let (_, cpg) = self.cpg.get_or_insert_with(|| {
            (
                snapshot.id.clone(),
                CodePropertyGraph::build(&snapshot.asts, &snapshot.graph),
            )
        });
        cpg
    }

    pub fn find_callers(&mut self, symbol: &str) -> Result<Vec<CpgNode>> {
        Ok(self.property_graph()?.find_callers(symbol))
    }

    pub fn find_callees(&mut self, symbol: &str) -> Result<Vec<CpgNode>> {
        Ok(self.property_graph()?.find_callees(symbol))
    }

    pub fn find_all_paths(&mut self, from: &str, to: &str, max_depth: usize) -> Result<Vec<Vec<String>>> {
        Ok(self.property_graph()?.find_all_paths(from, to, max_depth))
    }

    pub fn find_sccs(&mut self) -> Result<Vec<Vec<String>>> {
        Ok(self.property_graph()?.find_sccs())
    }

    // =====================================================
    // Advisory
    // =====================================================

    /// Annotates reports and appends them to the advisory log.
    ///
    /// Provider and storage failures are logged; the reports themselves are
    /// never modified.
    pub fn annotate(&self, provider: &dyn AdvisoryProvider, reports: &[ChangeReport]) -> Vec<AdvisoryReport> {
        let annotated = self.advisories.annotate(provider, reports);
        if let Err(e) = self.advisories.append(&annotated) {
            tracing::warn!("Failed to store advisory reports: {}", e);
        }
        annotated
    }

    pub fn advisories(&self, file: Option<&str>) -> Vec<AdvisoryReport> {
        match file {
            Some(path) => self.advisories.for_file(path),
            None => self.advisories.all(),
        }
    }

    // =====================================================
    // Version control
    // =====================================================

    /// Files git reports as changed, relative to the engine root. Files
    /// outside the root are dropped.
    pub fn vcs_changes(&self, base: Option<&str>) -> Result<Vec<ChangedFile>> {
        let git = GitIntegration::open(&self.root)?;
        let toplevel = git.toplevel()?;
        Ok(git
            .changed_files(base)?
            .into_iter()
            .filter_map(|file| {
                let path = relative_path(&self.root, &toplevel.join(&file.path))?;
                Some(ChangedFile {
                    path,
                    status: file.status,
                })
            })
            .collect())
    }

    pub fn vcs_diff(&self, path: &str, base: Option<&str>) -> Result<String> {
        GitIntegration::open(&self.root)?.file_diff(path, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::RuleBasedProvider;
    use crate::index::{MemoryStore, RiskLevel};
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    /// Rewrites a file and moves its mtime forward so the change is seen
    fn rewrite(dir: &Path, name: &str, content: &str) {
        write(dir, name, content);
        let file = fs::File::options().write(true).open(dir.join(name)).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    }

    fn engine(dir: &TempDir) -> Engine {
        Engine::with_store(dir.path(), EngineConfig::default(), Arc::new(MemoryStore::new()))
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "util.ts", "export function add(a: number, b: number): number { return a + b; }\n");
        write(
            dir.path(),
            "app.ts",
            "import { add } from './util';\nexport function run() { return add(1, 2); }\n",
        );
        dir
    }

    #[test]
    fn test_health_before_and_after_snapshot() {
        let dir = project();
        let mut e = engine(&dir);
        assert_eq!(e.health().unwrap().snapshot_count, 0);

        let snap = e.create_snapshot().unwrap();
        let health = e.health().unwrap();
        assert_eq!(health.snapshot_count, 1);
        assert_eq!(health.latest_snapshot, Some(snap.id));
        assert_eq!(health.tracked_files, 2);
    }

    #[test]
    fn test_analyze_reports_breaking_change_and_publishes() {
        let dir = project();
        let mut e = engine(&dir);
        e.create_snapshot().unwrap();
        let mut events = e.subscribe(Subscription::paths(["util.ts"]));

        rewrite(
            dir.path(),
            "util.ts",
            "export function add(a: number, b: number, c: number): number { return a + b + c; }\n",
        );
        let result = e.analyze(&[PathBuf::from("util.ts")]).unwrap();

        assert!(result.outcome.created);
        assert_eq!(result.outcome.impacted, vec!["app.ts"]);
        let util = result.reports.iter().find(|r| r.file_path == "util.ts").unwrap();
        assert_eq!(util.risk_level, RiskLevel::Breaking);

        let mut kinds = Vec::new();
        while let Some(event) = events.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["file_changed", "snapshot_created", "breaking_change_detected"]);
    }

    #[test]
    fn test_breaking_changes_against_working_tree() {
        let dir = project();
        let mut e = engine(&dir);
        e.create_snapshot().unwrap();
        assert!(e.breaking_changes().unwrap().is_empty());

        fs::remove_file(dir.path().join("util.ts")).unwrap();
        let reports = e.breaking_changes().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].risk_level, RiskLevel::Breaking);
        // preview only
        assert_eq!(e.health().unwrap().snapshot_count, 1);
    }

    #[test]
    fn test_restore_preview_is_read_only() {
        let dir = project();
        let mut e = engine(&dir);
        let snap = e.create_snapshot().unwrap();

        write(dir.path(), "util.ts", "export const changed = true;\n");
        write(dir.path(), "extra.ts", "export const extra = 1;\n");
        fs::remove_file(dir.path().join("app.ts")).unwrap();

        let preview = e.restore_preview(&snap.id).unwrap();
        assert_eq!(preview.added, vec!["app.ts"]);
        assert_eq!(preview.removed, vec!["extra.ts"]);
        assert_eq!(preview.modified, vec!["util.ts"]);
        assert!(!dir.path().join("app.ts").exists());
    }

    #[test]
    fn test_file_queries() {
        let dir = project();
        let mut e = engine(&dir);
        e.create_snapshot().unwrap();

        let impact = e.file_impact("util.ts").unwrap();
        assert_eq!(impact.dependents, vec!["app.ts"]);
        assert!(!impact.circular);

        let details = e.file_details("util.ts").unwrap();
        assert_eq!(details.metadata.language, "typescript");
        assert!(details.ast.unwrap().nodes.iter().any(|n| n.name == "add"));

        assert!(matches!(e.file_impact("missing.ts"), Err(ImpactError::FileNotFound(_))));
    }

    #[test]
    fn test_property_graph_queries() {
        let dir = project();
        let mut e = engine(&dir);
        e.create_snapshot().unwrap();

        let callers = e.find_callers("add").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].name, "run");
        assert_eq!(e.find_callees("run").unwrap()[0].name, "add");
        assert!(!e.find_all_paths("run", "add", 4).unwrap().is_empty());
    }

    #[test]
    fn test_property_graph_requires_snapshot() {
        let dir = project();
        let mut e = engine(&dir);
        assert!(e.find_callers("add").is_err());
    }

    #[test]
    fn test_vcs_changes_relative_to_root() {
        let dir = project();
        let root = dir.path().canonicalize().unwrap();
        let init = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(&root)
            .output();
        if !matches!(init, Ok(ref out) if out.status.success()) {
            // no git binary available
            return;
        }

        let e = Engine::with_store(&root, EngineConfig::default(), Arc::new(MemoryStore::new()));
        let mut changes = e.vcs_changes(None).unwrap();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["app.ts", "util.ts"]);
        assert!(changes.iter().all(|c| c.status == crate::git::ChangeStatus::Added));
    }

    #[test]
    fn test_annotate_persists_advisories() {
        let dir = project();
        let mut e = engine(&dir);
        e.create_snapshot().unwrap();
        fs::remove_file(dir.path().join("util.ts")).unwrap();
        let reports = e.breaking_changes().unwrap();

        let annotated = e.annotate(&RuleBasedProvider, &reports);
        assert_eq!(annotated.len(), 1);
        assert_eq!(e.advisories(Some("util.ts")).len(), 1);
        assert!(e.advisories(Some("app.ts")).is_empty());
    }
}
