//! File-level SAFE / RISKY / BREAKING classification between two snapshots.

use std::collections::BTreeSet;

use crate::diff::ast_diff::{scores, AstDiffEngine, ChangePattern, ChangePatternKind, ControlFlowChange};
use crate::graph::CodePropertyGraph;
use crate::index::{
    AstSnapshot, ChangeDetail, ChangeDetailKind, ChangeReport, FileChangeType, RiskLevel, Snapshot,
};

/// Applied to patterns whose symbols are exported by neither version
pub const INTERNAL_ADJUSTMENT: f64 = 0.7;

impl From<ChangePatternKind> for ChangeDetailKind {
    fn from(kind: ChangePatternKind) -> Self {
        match kind {
            ChangePatternKind::ExportRemoved => ChangeDetailKind::ExportRemoved,
            ChangePatternKind::ReturnTypeChanged => ChangeDetailKind::ReturnTypeChanged,
            ChangePatternKind::ParameterBreaking
            | ChangePatternKind::ParameterAdditive
            | ChangePatternKind::ParameterRenamed => ChangeDetailKind::ParameterChanged,
            ChangePatternKind::TypeDefinitionChanged => ChangeDetailKind::TypeChanged,
            ChangePatternKind::SignatureChanged => ChangeDetailKind::SignatureChanged,
            ChangePatternKind::NodeRemoved
            | ChangePatternKind::ExportAdded
            | ChangePatternKind::NodeAdded => ChangeDetailKind::InternalChange,
        }
    }
}

pub struct BreakingChangeDetector {
    diff: AstDiffEngine,
}

impl Default for BreakingChangeDetector {
    fn default() -> Self {
        Self::new(AstDiffEngine::default())
    }
}

impl BreakingChangeDetector {
    pub fn new(diff: AstDiffEngine) -> Self {
        Self { diff }
    }

    /// One report per added, removed or content-changed file, sorted by path
    pub fn detect_breaking_changes(
        &self,
        old: &Snapshot,
        new: &Snapshot,
        cpg: Option<&CodePropertyGraph>,
    ) -> Vec<ChangeReport> {
        let old_paths: BTreeSet<&String> = old.files.keys().chain(old.asts.keys()).collect();
        let new_paths: BTreeSet<&String> = new.files.keys().chain(new.asts.keys()).collect();

        let mut reports = Vec::new();
        for path in old_paths.union(&new_paths) {
            let before = ast_for(old, path);
            let after = ast_for(new, path);
            match (old_paths.contains(path), new_paths.contains(path)) {
                (true, false) => reports.push(self.removed_report(&before)),
                (false, true) => reports.push(self.added_report(&after)),
                (true, true) => {
                    if before.hash != after.hash {
                        reports.push(self.compare_files(&before, &after, cpg));
                    }
                }
                (false, false) => {}
            }
        }

        let breaking = reports.iter().filter(|r| r.is_breaking()).count();
        tracing::info!(
            "Compared {} -> {}: {} changed files, {} breaking",
            old.id,
            new.id,
            reports.len(),
            breaking
        );
        reports
    }

    pub fn removed_report(&self, old: &AstSnapshot) -> ChangeReport {
        let exports = old.export_names();
        let (risk_level, risk_score, detail) = if exports.is_empty() {
            (
                RiskLevel::Risky,
                RiskLevel::RISKY_THRESHOLD,
                ChangeDetail {
                    kind: ChangeDetailKind::InternalChange,
                    description: "File removed; it exported nothing but may still be imported for side effects"
                        .to_string(),
                    before: None,
                    after: None,
                    affected_symbols: old.nodes.iter().map(|n| n.name.clone()).collect(),
                    risk_score: RiskLevel::RISKY_THRESHOLD,
                },
            )
        } else {
            (
                RiskLevel::Breaking,
                scores::EXPORT_REMOVED,
                ChangeDetail {
                    kind: ChangeDetailKind::ExportRemoved,
                    description: format!("File removed along with {} exports", exports.len()),
                    before: None,
                    after: None,
                    affected_symbols: exports.into_iter().collect(),
                    risk_score: scores::EXPORT_REMOVED,
                },
            )
        };

        ChangeReport {
            file_path: old.file_path.clone(),
            change_type: FileChangeType::Removed,
            risk_level,
            risk_score,
            changes: vec![detail],
        }
    }

    pub fn added_report(&self, new: &AstSnapshot) -> ChangeReport {
        ChangeReport {
            file_path: new.file_path.clone(),
            change_type: FileChangeType::Added,
            risk_level: RiskLevel::Safe,
            risk_score: scores::NODE_ADDED,
            changes: vec![ChangeDetail {
                kind: ChangeDetailKind::InternalChange,
                description: "File added".to_string(),
                before: None,
                after: None,
                affected_symbols: new.export_names().into_iter().collect(),
                risk_score: scores::NODE_ADDED,
            }],
        }
    }

    /// Classifies a modified file
    pub fn compare_files(
        &self,
        old: &AstSnapshot,
        new: &AstSnapshot,
        cpg: Option<&CodePropertyGraph>,
    ) -> ChangeReport {
        let diff = self.diff.compute_diff(old, new);
        let patterns = self.diff.classify_change_patterns(&diff, old, new);
        let control_flow = self.diff.detect_control_flow_changes(old, new);

        let old_exports = old.export_names();
        let new_exports = new.export_names();
        let is_public = |symbol: &str| old_exports.contains(symbol) || new_exports.contains(symbol);

        let mut details: Vec<ChangeDetail> = patterns
            .iter()
            .map(|p| pattern_detail(p, p.exported || is_public(&p.symbol)))
            .collect();

        if let Some(detail) = control_flow_detail(&control_flow, &is_public) {
            details.push(detail);
        }

        // export-list diff, independent of node matching
        let removed_exports: Vec<String> = old_exports.difference(&new_exports).cloned().collect();
        let covered: BTreeSet<&str> = patterns
            .iter()
            .filter(|p| p.kind == ChangePatternKind::ExportRemoved)
            .map(|p| p.symbol.as_str())
            .collect();
        for name in &removed_exports {
            if !covered.contains(name.as_str()) {
                details.push(ChangeDetail {
                    kind: ChangeDetailKind::ExportRemoved,
                    description: format!("Export '{}' was removed", name),
                    before: Some(name.clone()),
                    after: None,
                    affected_symbols: vec![name.clone()],
                    risk_score: scores::EXPORT_REMOVED,
                });
            }
        }

        if details.is_empty() {
            details.push(ChangeDetail {
                kind: ChangeDetailKind::InternalChange,
                description: "Implementation changed; declarations are structurally identical".to_string(),
                before: None,
                after: None,
                affected_symbols: Vec::new(),
                risk_score: 0.0,
            });
        }

        let risk_score = details.iter().map(|d| d.risk_score).fold(0.0, f64::max);
        let risk_level = if removed_exports.is_empty() {
            RiskLevel::from_score(risk_score)
        } else {
            RiskLevel::Breaking
        };

        let impact: f64 = details
            .iter()
            .map(|d| d.affected_symbols.len() as f64 * d.risk_score / 100.0)
            .sum();
        let mut note = format!(" (impact score: {:.2}", impact);
        if let Some(cpg) = cpg {
            let touched: BTreeSet<String> = diff
                .removed
                .iter()
                .map(|n| n.name.clone())
                .chain(diff.modified.iter().map(|m| m.key.name.clone()))
                .collect();
            let callers = cpg.external_callers(&new.file_path, &touched);
            if !callers.is_empty() {
                note.push_str(&format!(", {} external callers", callers.len()));
            }
        }
        note.push(')');
        if let Some(first) = details.first_mut() {
            first.description.push_str(&note);
        }

        ChangeReport {
            file_path: new.file_path.clone(),
            change_type: FileChangeType::Modified,
            risk_level,
            risk_score,
            changes: details,
        }
    }
}

fn ast_for(snapshot: &Snapshot, path: &str) -> AstSnapshot {
    snapshot.asts.get(path).cloned().unwrap_or_else(|| {
        let hash = snapshot.files.get(path).map(|f| f.hash.clone()).unwrap_or_default();
        AstSnapshot::empty(path, hash)
    })
}

fn pattern_detail(pattern: &ChangePattern, public: bool) -> ChangeDetail {
    let risk_score = if public {
        pattern.risk_score
    } else {
        pattern.risk_score * INTERNAL_ADJUSTMENT
    };
    ChangeDetail {
        kind: pattern.kind.into(),
        description: pattern.description.clone(),
        before: pattern.before.clone(),
        after: pattern.after.clone(),
        affected_symbols: vec![pattern.symbol.clone()],
        risk_score,
    }
}

/// Declaration-sequence drift as a detail.
///
/// Drift alone never reaches BREAKING, and pure insertions score like a new
/// export.
fn control_flow_detail(change: &ControlFlowChange, is_public: &dyn Fn(&str) -> bool) -> Option<ChangeDetail> {
    if change.is_empty() {
        return None;
    }

    let name_of = |key: &str| key.split_once(':').map(|(_, n)| n.to_string()).unwrap_or_default();
    let mut affected: Vec<String> = change
        .deleted
        .iter()
        .chain(change.inserted.iter())
        .map(|k| name_of(k.as_str()))
        .chain(
            change
                .substituted
                .iter()
                .flat_map(|(a, b)| [name_of(a.as_str()), name_of(b.as_str())]),
        )
        .collect();
    affected.sort();
    affected.dedup();

    let mut risk = change.risk_score.min(RiskLevel::BREAKING_THRESHOLD - 1.0);
    if change.deleted.is_empty() && change.substituted.is_empty() {
        risk = risk.min(scores::EXPORT_ADDED);
    }
    if !affected.iter().any(|s| is_public(s)) {
        risk *= INTERNAL_ADJUSTMENT;
    }

    Some(ChangeDetail {
        kind: ChangeDetailKind::InternalChange,
        description: format!(
            "Declaration structure drift: distance {} ({} inserted, {} deleted, {} substituted)",
            change.distance,
            change.inserted.len(),
            change.deleted.len(),
            change.substituted.len()
        ),
        before: None,
        after: None,
        affected_symbols: affected,
        risk_score: risk,
    })
}
