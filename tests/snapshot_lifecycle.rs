//! Integration tests for the snapshot lifecycle: creation, incremental
//! tracking, history, export/import and trends.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use code_impact::snapshot::TrendDirection;
use code_impact::{Engine, EngineConfig, ImpactError};

// ============================================================================
// Test Helpers
// ============================================================================

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

fn rewrite(dir: &Path, name: &str, content: &str) {
    write(dir, name, content);
    let file = fs::File::options()
        .write(true)
        .open(dir.join(name))
        .expect("Failed to open file");
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .expect("Failed to set mtime");
}

fn project() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write(
        dir.path(),
        "src/math.ts",
        "export function square(x: number): number { return x * x; }\n",
    );
    write(
        dir.path(),
        "src/index.ts",
        "import { square } from './math';\nexport const four = square(2);\n",
    );
    dir
}

fn open(dir: &TempDir) -> Engine {
    Engine::open_with_config(dir.path(), EngineConfig::default()).expect("Failed to open engine")
}

// ============================================================================
// Creation and Incremental Tracking
// ============================================================================

mod tracking {
    use super::*;

    #[test]
    fn test_snapshot_persists_across_engines() {
        let dir = project();
        let id = open(&dir).create_snapshot().unwrap().id;

        let engine = open(&dir);
        let health = engine.health().unwrap();
        assert_eq!(health.snapshot_count, 1);
        assert_eq!(health.latest_snapshot.as_deref(), Some(id.as_str()));

        let snapshot = engine.snapshot(&id).unwrap();
        assert_eq!(snapshot.files.len(), 2);
        assert!(snapshot.asts.contains_key("src/math.ts"));
        assert!(snapshot.graph.has_edge("src/index.ts", "src/math.ts"));
    }

    #[test]
    fn test_first_analysis_falls_back_to_full_scan() {
        let dir = project();
        let mut engine = open(&dir);

        let result = engine.analyze(&[PathBuf::from("src/math.ts")]).unwrap();
        assert!(result.outcome.full_scan);
        assert!(result.outcome.created);
        assert!(result.reports.is_empty());
    }

    #[test]
    fn test_repeated_analysis_is_idempotent() {
        let dir = project();
        let mut engine = open(&dir);
        let base = engine.create_snapshot().unwrap();

        rewrite(dir.path(), "src/math.ts", "export function square(x: number): number { return x ** 2; }\n");
        let first = engine.analyze(&[PathBuf::from("src/math.ts")]).unwrap();
        assert!(first.outcome.created);
        assert_eq!(first.outcome.previous_id.as_deref(), Some(base.id.as_str()));

        let second = engine.analyze(&[PathBuf::from("src/math.ts")]).unwrap();
        assert!(!second.outcome.created);
        assert_eq!(second.outcome.snapshot_id, first.outcome.snapshot_id);
        assert_eq!(engine.health().unwrap().snapshot_count, 2);
    }

    #[test]
    fn test_touch_without_content_change_is_noop() {
        let dir = project();
        let mut engine = open(&dir);
        let base = engine.create_snapshot().unwrap();

        let same = fs::read_to_string(dir.path().join("src/math.ts")).unwrap();
        rewrite(dir.path(), "src/math.ts", &same);
        let result = engine.analyze(&[PathBuf::from("src/math.ts")]).unwrap();

        assert!(!result.outcome.created);
        assert_eq!(result.outcome.snapshot_id, base.id);
    }

    #[test]
    fn test_removed_file_leaves_snapshot() {
        let dir = project();
        let mut engine = open(&dir);
        engine.create_snapshot().unwrap();

        fs::remove_file(dir.path().join("src/math.ts")).unwrap();
        let result = engine.analyze(&[PathBuf::from("src/math.ts")]).unwrap();

        assert_eq!(result.outcome.removed, vec!["src/math.ts"]);
        let latest = engine.snapshot(&result.outcome.snapshot_id).unwrap();
        assert!(!latest.files.contains_key("src/math.ts"));
        assert!(!latest.asts.contains_key("src/math.ts"));
        assert!(latest.graph.is_consistent());
    }

    #[test]
    fn test_hashes_match_between_index_and_snapshot() {
        let dir = project();
        let mut engine = open(&dir);
        let snapshot = engine.create_snapshot().unwrap();

        for (path, meta) in &snapshot.files {
            let details = engine.file_details(path).unwrap();
            assert_eq!(details.metadata.hash, meta.hash);
            assert_eq!(snapshot.asts[path].hash, meta.hash);
        }
    }
}

// ============================================================================
// History and Portability
// ============================================================================

mod history {
    use super::*;

    #[test]
    fn test_history_is_newest_first_and_filters_tags() {
        let dir = project();
        let mut engine = open(&dir);
        let first = engine.create_snapshot().unwrap();
        rewrite(dir.path(), "src/index.ts", "export const four = 4;\n");
        let second = engine.analyze(&[PathBuf::from("src/index.ts")]).unwrap();

        let page = engine.history(0, 10, None).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, second.outcome.snapshot_id);
        assert_eq!(page.items[1].id, first.id);

        engine.tag(&first.id, &["release".to_string()], Some("v1".to_string())).unwrap();
        let tagged = engine.history(0, 10, Some("release")).unwrap();
        assert_eq!(tagged.total, 1);
        assert_eq!(tagged.items[0].id, first.id);
        assert_eq!(tagged.items[0].description.as_deref(), Some("v1"));
    }

    #[test]
    fn test_export_import_between_projects() {
        let source = project();
        let mut engine = open(&source);
        let snapshot = engine.create_snapshot().unwrap();
        engine.tag(&snapshot.id, &["shared".to_string()], None).unwrap();

        let out = TempDir::new().unwrap();
        let file = out.path().join("snap.json.gz");
        engine.export_snapshot(&snapshot.id, &file).unwrap();

        let target = project();
        let other = open(&target);
        let id = other.import_snapshot(&file).unwrap();
        assert_eq!(id, snapshot.id);
        assert_eq!(other.snapshot(&id).unwrap().files, snapshot.files);
        assert_eq!(other.history(0, 10, Some("shared")).unwrap().total, 1);

        assert!(other.import_snapshot(&file).is_err());
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let dir = project();
        let engine = open(&dir);
        assert!(matches!(
            engine.snapshot("0000000000000-deadbeef"),
            Err(ImpactError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_delta_between_snapshots() {
        let dir = project();
        let mut engine = open(&dir);
        let first = engine.create_snapshot().unwrap();
        write(dir.path(), "src/extra.ts", "export const extra = 1;\n");
        let second = engine.analyze(&[PathBuf::from("src/extra.ts")]).unwrap();

        let delta = engine.delta(&first.id, &second.outcome.snapshot_id).unwrap();
        assert_eq!(delta.added.keys().collect::<Vec<_>>(), vec!["src/extra.ts"]);
        assert!(delta.removed.is_empty());
        assert_eq!(delta.change_count(), 1);

        let reports = engine.compare(&first.id, &second.outcome.snapshot_id).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].file_path, "src/extra.ts");
    }
}

// ============================================================================
// Trends
// ============================================================================

mod trends {
    use super::*;

    #[test]
    fn test_growing_project_trends_upward() {
        let dir = project();
        let mut engine = open(&dir);
        engine.create_snapshot().unwrap();

        for i in 0..3 {
            let name = format!("src/feature{}.ts", i);
            write(
                dir.path(),
                &name,
                &format!(
                    "import {{ square }} from './math';\nexport function f{i}(x: number) {{ return square(x) + {i}; }}\n"
                ),
            );
            engine.analyze(&[PathBuf::from(&name)]).unwrap();
        }

        let report = engine.trend().unwrap();
        assert_eq!(report.snapshot_count, 4);
        assert_eq!(report.file_count_trend, TrendDirection::Increasing);
        assert!(report.dependency_growth > 0);
    }

    #[test]
    fn test_trend_without_history_is_stable() {
        let dir = project();
        let mut engine = open(&dir);
        engine.create_snapshot().unwrap();

        let report = engine.trend().unwrap();
        assert_eq!(report.snapshot_count, 1);
        assert_eq!(report.complexity_trend, TrendDirection::Stable);
        assert!(report.regressions.is_empty());
    }
}
