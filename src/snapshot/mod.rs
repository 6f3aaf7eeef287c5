//! Snapshot lifecycle: creation, storage, deltas and trends.

pub mod delta;
pub mod manager;
pub mod tracker;
pub mod trend;

pub use delta::{FileEntry, SnapshotDelta, SnapshotDiffEngine};
pub use manager::{id_timestamp, MaintenanceReport, Page, SnapshotExport, SnapshotManager, SnapshotSummary};
pub use tracker::{compute_impact_set, ChangeTracker, ImpactSet, TrackOutcome};
pub use trend::{
    detect_regressions, trend, Regression, RegressionMetric, Severity, SnapshotMetrics, TrendAnalyzer,
    TrendDirection, TrendReport,
};
