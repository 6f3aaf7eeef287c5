//! Longitudinal metrics over snapshot history and regression detection.

use serde::{Deserialize, Serialize};

use crate::index::Snapshot;

/// Relative change between halves below which a series counts as stable
pub const NOISE_THRESHOLD: f64 = 0.1;
const MAX_WINDOW: usize = 5;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMetric {
    Complexity,
    /// Circular dependency count
    Risk,
    Dependencies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub snapshot_id: String,
    pub timestamp: i64,
    pub file_count: usize,
    pub function_count: usize,
    pub total_lines: usize,
    /// function count x (1 + average lines per file / 100)
    pub complexity: f64,
    pub dependency_count: usize,
    pub circular_count: usize,
}

impl SnapshotMetrics {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let file_count = snapshot.files.len();
        let function_count = snapshot.function_count();
        let total_lines = snapshot.total_lines();
        let avg_lines = if file_count == 0 {
            0.0
        } else {
            total_lines as f64 / file_count as f64
        };

        Self {
            snapshot_id: snapshot.id.clone(),
            timestamp: snapshot.timestamp,
            file_count,
            function_count,
            total_lines,
            complexity: function_count as f64 * (1.0 + avg_lines / 100.0),
            dependency_count: snapshot.graph.edge_count(),
            circular_count: snapshot.graph.cycles.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub snapshot_id: String,
    pub metric: RegressionMetric,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub snapshot_count: usize,
    pub metrics: Vec<SnapshotMetrics>,
    pub complexity_trend: TrendDirection,
    pub file_count_trend: TrendDirection,
    /// Last minus first dependency edge count
    pub dependency_growth: i64,
    pub dependency_trend: TrendDirection,
    /// File-level changes per hour across the series
    pub change_frequency: f64,
    pub circular_trend: TrendDirection,
    pub regressions: Vec<Regression>,
}

#[derive(Debug, Default)]
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Snapshots may arrive in any order; they are sorted by timestamp
    pub fn analyze(&self, snapshots: &[Snapshot]) -> TrendReport {
        let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let metrics: Vec<SnapshotMetrics> = ordered.iter().map(|s| SnapshotMetrics::from_snapshot(s)).collect();
        let complexity: Vec<f64> = metrics.iter().map(|m| m.complexity).collect();
        let files: Vec<f64> = metrics.iter().map(|m| m.file_count as f64).collect();
        let deps: Vec<f64> = metrics.iter().map(|m| m.dependency_count as f64).collect();
        let circular: Vec<f64> = metrics.iter().map(|m| m.circular_count as f64).collect();

        let dependency_growth = match (metrics.first(), metrics.last()) {
            (Some(first), Some(last)) => last.dependency_count as i64 - first.dependency_count as i64,
            _ => 0,
        };

        let report = TrendReport {
            snapshot_count: metrics.len(),
            complexity_trend: trend(&complexity),
            file_count_trend: trend(&files),
            dependency_growth,
            dependency_trend: trend(&deps),
            change_frequency: change_frequency(&ordered),
            circular_trend: trend(&circular),
            regressions: detect_regressions(&metrics),
            metrics,
        };

        tracing::debug!(
            "Trend over {} snapshots: {} regressions",
            report.snapshot_count,
            report.regressions.len()
        );
        report
    }
}

/// First-half mean against second-half mean with a 10% noise band
pub fn trend(values: &[f64]) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::Stable;
    }
    let mid = values.len() / 2;
    let first = mean(&values[..mid]);
    let second = mean(&values[mid..]);

    if first == 0.0 {
        return if second > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Stable
        };
    }

    let change = (second - first) / first.abs();
    if change > NOISE_THRESHOLD {
        TrendDirection::Increasing
    } else if change < -NOISE_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Added, removed and rehashed files between neighbours, per hour
fn change_frequency(ordered: &[&Snapshot]) -> f64 {
    let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
        return 0.0;
    };
    let elapsed_hours = (last.timestamp - first.timestamp) as f64 / MS_PER_HOUR;
    if elapsed_hours <= 0.0 {
        return 0.0;
    }

    let changes: usize = ordered
        .windows(2)
        .map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let removed = a.files.keys().filter(|p| !b.files.contains_key(*p)).count();
            let touched = b
                .files
                .iter()
                .filter(|(p, meta)| a.files.get(*p).map(|old| old.hash != meta.hash).unwrap_or(true))
                .count();
            removed + touched
        })
        .sum();

    changes as f64 / elapsed_hours
}

/// Sliding-window outlier test over the metric series.
///
/// The window is the `min(5, n/2)` values before each point. Complexity is
/// flagged above mean + 2 sigma, risk above 1.5 x mean, and dependencies when a
/// single step grows by more than 20% of the windowed mean.
pub fn detect_regressions(metrics: &[SnapshotMetrics]) -> Vec<Regression> {
    let n = metrics.len();
    let window = MAX_WINDOW.min(n / 2);
    if window == 0 {
        return Vec::new();
    }

    let complexity: Vec<f64> = metrics.iter().map(|m| m.complexity).collect();
    let risk: Vec<f64> = metrics.iter().map(|m| m.circular_count as f64).collect();
    let deps: Vec<f64> = metrics.iter().map(|m| m.dependency_count as f64).collect();

    let mut regressions = Vec::new();
    for i in window..n {
        let id = &metrics[i].snapshot_id;

        let past = &complexity[i - window..i];
        let threshold = mean(past) + 2.0 * std_dev(past);
        if complexity[i] > threshold {
            regressions.push(regression(id, RegressionMetric::Complexity, complexity[i], threshold));
        }

        let past = &risk[i - window..i];
        let threshold = mean(past) * 1.5;
        if risk[i] > threshold {
            regressions.push(regression(id, RegressionMetric::Risk, risk[i], threshold));
        }

        let past = &deps[i - window..i];
        let step = deps[i] - deps[i - 1];
        let allowed = 0.2 * mean(past);
        if step > allowed {
            regressions.push(regression(id, RegressionMetric::Dependencies, deps[i], deps[i - 1] + allowed));
        }
    }

    regressions
}

fn regression(id: &str, metric: RegressionMetric, value: f64, threshold: f64) -> Regression {
    Regression {
        snapshot_id: id.to_string(),
        metric,
        value,
        threshold,
        severity: severity(value, threshold),
    }
}

/// Low within 25% over the threshold, medium within 50%, high beyond
fn severity(value: f64, threshold: f64) -> Severity {
    if threshold <= 0.0 {
        return Severity::High;
    }
    let excess = (value - threshold) / threshold;
    if excess <= 0.25 {
        Severity::Low
    } else if excess <= 0.5 {
        Severity::Medium
    } else {
        Severity::High
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
