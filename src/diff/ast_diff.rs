//! Structural comparison of two AST snapshots of one file.
//!
//! Nodes are matched by `(kind, name)`. Two declarations sharing both are the
//! same entity across versions, whatever their bodies; the first one in a
//! file wins, so overloads collapse into a single entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::index::{AstNode, AstSnapshot, NodeKey, NodeKind, Parameter};

// =====================================================
// Node-level changes
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeChange {
    SignatureChanged {
        old: Option<String>,
        new: Option<String>,
    },
    ReturnTypeChanged {
        old: Option<String>,
        new: Option<String>,
    },
    ParameterAdded {
        name: String,
        optional: bool,
    },
    ParameterRemoved {
        name: String,
    },
    ParameterRenamed {
        old: String,
        new: String,
    },
    ParameterTypeChanged {
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
    ParameterOptionalityChanged {
        name: String,
        now_optional: bool,
    },
    ExportAdded {
        name: String,
    },
    ExportRemoved {
        name: String,
    },
}

fn or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("none")
}

impl NodeChange {
    /// Stable tag, e.g. `parameter_type_changed:b:number->string`
    pub fn tag(&self) -> String {
        match self {
            NodeChange::SignatureChanged { .. } => "signature_changed".to_string(),
            NodeChange::ReturnTypeChanged { old, new } => {
                format!("return_type_changed:{}->{}", or_none(old), or_none(new))
            }
            NodeChange::ParameterAdded { name, optional } => {
                format!("parameter_added:{}{}", name, if *optional { "?" } else { "" })
            }
            NodeChange::ParameterRemoved { name } => format!("parameter_removed:{}", name),
            NodeChange::ParameterRenamed { old, new } => format!("parameter_renamed:{}->{}", old, new),
            NodeChange::ParameterTypeChanged { name, old, new } => {
                format!("parameter_type_changed:{}:{}->{}", name, or_none(old), or_none(new))
            }
            NodeChange::ParameterOptionalityChanged { name, now_optional } => format!(
                "parameter_optionality_changed:{}:{}",
                name,
                if *now_optional { "optional" } else { "required" }
            ),
            NodeChange::ExportAdded { name } => format!("export_added:{}", name),
            NodeChange::ExportRemoved { name } => format!("export_removed:{}", name),
        }
    }

    /// Whether existing callers of the parameter list can break
    fn is_breaking_parameter_change(&self) -> bool {
        match self {
            NodeChange::ParameterRemoved { .. } | NodeChange::ParameterTypeChanged { .. } => true,
            NodeChange::ParameterAdded { optional, .. } => !optional,
            NodeChange::ParameterOptionalityChanged { now_optional, .. } => !now_optional,
            _ => false,
        }
    }

    fn is_additive_parameter_change(&self) -> bool {
        match self {
            NodeChange::ParameterAdded { optional, .. } => *optional,
            NodeChange::ParameterOptionalityChanged { now_optional, .. } => *now_optional,
            _ => false,
        }
    }
}

impl fmt::Display for NodeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedNode {
    pub key: NodeKey,
    pub old: AstNode,
    pub new: AstNode,
    pub changes: Vec<NodeChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstDiff {
    pub file_path: String,
    pub added: Vec<AstNode>,
    pub removed: Vec<AstNode>,
    pub modified: Vec<ModifiedNode>,
    pub unchanged: Vec<NodeKey>,
}

impl AstDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_tags(&self) -> Vec<String> {
        self.modified
            .iter()
            .flat_map(|m| m.changes.iter().map(|c| format!("{}:{}", m.key, c.tag())))
            .collect()
    }
}

// =====================================================
// Change patterns
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePatternKind {
    ExportRemoved,
    NodeRemoved,
    ExportAdded,
    NodeAdded,
    ReturnTypeChanged,
    ParameterBreaking,
    ParameterAdditive,
    ParameterRenamed,
    TypeDefinitionChanged,
    SignatureChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePattern {
    pub kind: ChangePatternKind,
    pub symbol: String,
    pub node_kind: NodeKind,
    /// Exported in either version
    pub exported: bool,
    /// 0 to 100
    pub risk_score: f64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Pattern risk scores, exported then internal where they differ
pub mod scores {
    pub const EXPORT_REMOVED: f64 = 95.0;
    pub const NODE_REMOVED: f64 = 40.0;
    pub const EXPORT_ADDED: f64 = 20.0;
    pub const NODE_ADDED: f64 = 10.0;
    pub const RETURN_BASE_TYPE: (f64, f64) = (90.0, 60.0);
    pub const RETURN_TYPE: (f64, f64) = (45.0, 30.0);
    pub const PARAMETER_BREAKING: (f64, f64) = (85.0, 55.0);
    pub const PARAMETER_ADDITIVE: f64 = 15.0;
    pub const PARAMETER_RENAMED: f64 = 10.0;
    pub const TYPE_DEFINITION: (f64, f64) = (75.0, 45.0);
    pub const SIGNATURE: (f64, f64) = (70.0, 45.0);
}

fn pick(scores: (f64, f64), exported: bool) -> f64 {
    if exported {
        scores.0
    } else {
        scores.1
    }
}

/// Outermost type constructor: `Promise<User[]>` -> `Promise`
fn base_type(ty: &str) -> &str {
    ty.split(|c| matches!(c, '<' | '[' | '|' | '&' | '('))
        .next()
        .unwrap_or(ty)
        .trim()
}

// =====================================================
// Declaration-sequence edit distance
// =====================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowChange {
    pub distance: usize,
    pub inserted: Vec<String>,
    pub deleted: Vec<String>,
    pub substituted: Vec<(String, String)>,
    /// `distance * edit_weight`, capped at 100
    pub risk_score: f64,
}

impl ControlFlowChange {
    pub fn is_empty(&self) -> bool {
        self.distance == 0
    }
}

// =====================================================
// Engine
// =====================================================

pub struct AstDiffEngine {
    edit_weight: u32,
}

impl Default for AstDiffEngine {
    fn default() -> Self {
        Self::new(10)
    }
}

impl AstDiffEngine {
    pub fn new(edit_weight: u32) -> Self {
        Self { edit_weight }
    }

    pub fn compute_diff(&self, old: &AstSnapshot, new: &AstSnapshot) -> AstDiff {
        let mut diff = AstDiff {
            file_path: new.file_path.clone(),
            ..Default::default()
        };

        if old.hash == new.hash {
            diff.unchanged = index_nodes(new).into_keys().collect();
            return diff;
        }

        let old_nodes = index_nodes(old);
        let new_nodes = index_nodes(new);

        for (key, old_node) in &old_nodes {
            match new_nodes.get(key) {
                None => diff.removed.push((*old_node).clone()),
                Some(new_node) => {
                    let changes = node_changes(old_node, new_node);
                    if changes.is_empty() {
                        diff.unchanged.push(key.clone());
                    } else {
                        diff.modified.push(ModifiedNode {
                            key: key.clone(),
                            old: (*old_node).clone(),
                            new: (*new_node).clone(),
                            changes,
                        });
                    }
                }
            }
        }
        for (key, new_node) in &new_nodes {
            if !old_nodes.contains_key(key) {
                diff.added.push((*new_node).clone());
            }
        }

        diff
    }

    /// Scores every change in `diff`; `old`/`new` supply export lists
    pub fn classify_change_patterns(
        &self,
        diff: &AstDiff,
        old: &AstSnapshot,
        new: &AstSnapshot,
    ) -> Vec<ChangePattern> {
        let old_exports = old.export_names();
        let new_exports = new.export_names();
        let exported_in = |node: &AstNode, names: &std::collections::BTreeSet<String>| {
            node.is_exported() || names.contains(&node.name)
        };

        let mut patterns = Vec::new();

        for node in &diff.removed {
            let exported = exported_in(node, &old_exports);
            patterns.push(ChangePattern {
                kind: if exported {
                    ChangePatternKind::ExportRemoved
                } else {
                    ChangePatternKind::NodeRemoved
                },
                symbol: node.name.clone(),
                node_kind: node.kind,
                exported,
                risk_score: if exported {
                    scores::EXPORT_REMOVED
                } else {
                    scores::NODE_REMOVED
                },
                description: format!(
                    "{} {} '{}' was removed",
                    if exported { "Exported" } else { "Internal" },
                    node.kind,
                    node.name
                ),
                before: node.signature.clone(),
                after: None,
            });
        }

        for node in &diff.added {
            let exported = exported_in(node, &new_exports);
            patterns.push(ChangePattern {
                kind: if exported {
                    ChangePatternKind::ExportAdded
                } else {
                    ChangePatternKind::NodeAdded
                },
                symbol: node.name.clone(),
                node_kind: node.kind,
                exported,
                risk_score: if exported {
                    scores::EXPORT_ADDED
                } else {
                    scores::NODE_ADDED
                },
                description: format!("Added {} '{}'", node.kind, node.name),
                before: None,
                after: node.signature.clone(),
            });
        }

        for modified in &diff.modified {
            patterns.extend(self.classify_modified(
                modified,
                exported_in(&modified.old, &old_exports) || exported_in(&modified.new, &new_exports),
            ));
        }

        patterns
    }

    fn classify_modified(&self, modified: &ModifiedNode, exported: bool) -> Vec<ChangePattern> {
        let (old, new) = (&modified.old, &modified.new);
        let pattern = |kind, risk_score, description: String, before, after| ChangePattern {
            kind,
            symbol: new.name.clone(),
            node_kind: new.kind,
            exported,
            risk_score,
            description,
            before,
            after,
        };

        let mut patterns = Vec::new();

        for change in &modified.changes {
            if let NodeChange::ExportRemoved { name } = change {
                patterns.push(pattern(
                    ChangePatternKind::ExportRemoved,
                    scores::EXPORT_REMOVED,
                    format!("{} '{}' is no longer exported as '{}'", new.kind, new.name, name),
                    Some(name.clone()),
                    None,
                ));
            }
            if let NodeChange::ExportAdded { name } = change {
                patterns.push(pattern(
                    ChangePatternKind::ExportAdded,
                    scores::EXPORT_ADDED,
                    format!("{} '{}' is now exported as '{}'", new.kind, new.name, name),
                    None,
                    Some(name.clone()),
                ));
            }
        }

        let mut explained = false;

        if let Some(NodeChange::ReturnTypeChanged { old: before, new: after }) = modified
            .changes
            .iter()
            .find(|c| matches!(c, NodeChange::ReturnTypeChanged { .. }))
        {
            let base_changed = match (before, after) {
                (Some(a), Some(b)) => base_type(a) != base_type(b),
                _ => false,
            };
            let label = if new.kind == NodeKind::Function {
                "Return type"
            } else {
                "Declared type"
            };
            patterns.push(pattern(
                ChangePatternKind::ReturnTypeChanged,
                pick(
                    if base_changed {
                        scores::RETURN_BASE_TYPE
                    } else {
                        scores::RETURN_TYPE
                    },
                    exported,
                ),
                format!(
                    "{} of '{}' changed from {} to {}",
                    label,
                    new.name,
                    or_none(before),
                    or_none(after)
                ),
                before.clone(),
                after.clone(),
            ));
            explained = true;
        }

        let breaking: Vec<String> = modified
            .changes
            .iter()
            .filter(|c| c.is_breaking_parameter_change())
            .map(|c| c.tag())
            .collect();
        let additive: Vec<String> = modified
            .changes
            .iter()
            .filter(|c| c.is_additive_parameter_change())
            .map(|c| c.tag())
            .collect();
        let renamed: Vec<String> = modified
            .changes
            .iter()
            .filter(|c| matches!(c, NodeChange::ParameterRenamed { .. }))
            .map(|c| c.tag())
            .collect();

        if !breaking.is_empty() {
            patterns.push(pattern(
                ChangePatternKind::ParameterBreaking,
                pick(scores::PARAMETER_BREAKING, exported),
                format!("Parameters of '{}' changed incompatibly: {}", new.name, breaking.join(", ")),
                old.signature.clone(),
                new.signature.clone(),
            ));
            explained = true;
        } else if !additive.is_empty() {
            patterns.push(pattern(
                ChangePatternKind::ParameterAdditive,
                scores::PARAMETER_ADDITIVE,
                format!("Parameters of '{}' extended: {}", new.name, additive.join(", ")),
                old.signature.clone(),
                new.signature.clone(),
            ));
            explained = true;
        }
        if !renamed.is_empty() {
            patterns.push(pattern(
                ChangePatternKind::ParameterRenamed,
                scores::PARAMETER_RENAMED,
                format!("Parameters of '{}' renamed: {}", new.name, renamed.join(", ")),
                old.signature.clone(),
                new.signature.clone(),
            ));
            explained = true;
        }

        let signature_changed = modified
            .changes
            .iter()
            .any(|c| matches!(c, NodeChange::SignatureChanged { .. }));
        if signature_changed && !explained {
            let type_like = matches!(
                new.kind,
                NodeKind::Interface | NodeKind::Type | NodeKind::Enum | NodeKind::Class
            );
            let (kind, scores) = if type_like {
                (ChangePatternKind::TypeDefinitionChanged, scores::TYPE_DEFINITION)
            } else {
                (ChangePatternKind::SignatureChanged, scores::SIGNATURE)
            };
            patterns.push(pattern(
                kind,
                pick(scores, exported),
                format!("Definition of {} '{}' changed", new.kind, new.name),
                old.signature.clone(),
                new.signature.clone(),
            ));
        }

        patterns
    }

    /// Unchanged nodes over the larger node count, in `[0, 1]`
    pub fn compute_similarity(&self, old: &AstSnapshot, new: &AstSnapshot) -> f64 {
        let diff = self.compute_diff(old, new);
        let denominator = index_nodes(old).len().max(index_nodes(new).len()).max(1);
        (diff.unchanged.len() as f64 / denominator as f64).clamp(0.0, 1.0)
    }

    /// Levenshtein alignment of the two files' sorted `kind:name` sequences.
    ///
    /// A coarse structural proxy: it sees declarations appear, vanish or be
    /// replaced, not real control flow.
    pub fn detect_control_flow_changes(&self, old: &AstSnapshot, new: &AstSnapshot) -> ControlFlowChange {
        let a = sorted_keys(old);
        let b = sorted_keys(new);
        let (n, m) = (a.len(), b.len());

        let mut dp = vec![vec![0usize; m + 1]; n + 1];
        for (i, row) in dp.iter_mut().enumerate() {
            row[0] = i;
        }
        for j in 0..=m {
            dp[0][j] = j;
        }
        for i in 1..=n {
            for j in 1..=m {
                let cost = usize::from(a[i - 1] != b[j - 1]);
                dp[i][j] = (dp[i - 1][j] + 1)
                    .min(dp[i][j - 1] + 1)
                    .min(dp[i - 1][j - 1] + cost);
            }
        }

        let mut change = ControlFlowChange {
            distance: dp[n][m],
            ..Default::default()
        };

        let (mut i, mut j) = (n, m);
        while i > 0 || j > 0 {
            if i > 0 && j > 0 && a[i - 1] == b[j - 1] && dp[i][j] == dp[i - 1][j - 1] {
                i -= 1;
                j -= 1;
            } else if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
                change.deleted.push(a[i - 1].clone());
                i -= 1;
            } else if j > 0 && dp[i][j] == dp[i][j - 1] + 1 {
                change.inserted.push(b[j - 1].clone());
                j -= 1;
            } else if i > 0 && j > 0 {
                change.substituted.push((a[i - 1].clone(), b[j - 1].clone()));
                i -= 1;
                j -= 1;
            } else {
                break;
            }
        }
        change.inserted.reverse();
        change.deleted.reverse();
        change.substituted.reverse();

        change.risk_score = (change.distance as f64 * self.edit_weight as f64).min(100.0);
        change
    }
}

fn index_nodes(snapshot: &AstSnapshot) -> BTreeMap<NodeKey, &AstNode> {
    let mut map = BTreeMap::new();
    for node in &snapshot.nodes {
        map.entry(node.key()).or_insert(node);
    }
    map
}

fn sorted_keys(snapshot: &AstSnapshot) -> Vec<String> {
    index_nodes(snapshot).keys().map(|k| k.to_string()).collect()
}

fn node_changes(old: &AstNode, new: &AstNode) -> Vec<NodeChange> {
    let mut changes = Vec::new();

    if old.signature != new.signature {
        changes.push(NodeChange::SignatureChanged {
            old: old.signature.clone(),
            new: new.signature.clone(),
        });
    }
    if old.return_type != new.return_type {
        changes.push(NodeChange::ReturnTypeChanged {
            old: old.return_type.clone(),
            new: new.return_type.clone(),
        });
    }

    let empty: Vec<Parameter> = Vec::new();
    let old_params = old.parameters.as_ref().unwrap_or(&empty);
    let new_params = new.parameters.as_ref().unwrap_or(&empty);
    for i in 0..old_params.len().max(new_params.len()) {
        match (old_params.get(i), new_params.get(i)) {
            (Some(a), Some(b)) => {
                if a.type_annotation != b.type_annotation {
                    changes.push(NodeChange::ParameterTypeChanged {
                        name: b.name.clone(),
                        old: a.type_annotation.clone(),
                        new: b.type_annotation.clone(),
                    });
                } else if a.name != b.name {
                    changes.push(NodeChange::ParameterRenamed {
                        old: a.name.clone(),
                        new: b.name.clone(),
                    });
                }
                if a.optional != b.optional {
                    changes.push(NodeChange::ParameterOptionalityChanged {
                        name: b.name.clone(),
                        now_optional: b.optional,
                    });
                }
            }
            (Some(a), None) => changes.push(NodeChange::ParameterRemoved { name: a.name.clone() }),
            (None, Some(b)) => changes.push(NodeChange::ParameterAdded {
                name: b.name.clone(),
                optional: b.optional,
            }),
            (None, None) => {}
        }
    }

    let empty: Vec<String> = Vec::new();
    let old_exports = old.exports.as_ref().unwrap_or(&empty);
    let new_exports = new.exports.as_ref().unwrap_or(&empty);
    for name in old_exports {
        if !new_exports.contains(name) {
            changes.push(NodeChange::ExportRemoved { name: name.clone() });
        }
    }
    for name in new_exports {
        if !old_exports.contains(name) {
            changes.push(NodeChange::ExportAdded { name: name.clone() });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::AstExtractor;

    fn snap(hash: &str, source: &str) -> AstSnapshot {
        AstExtractor::default().extract_source("util.ts", hash, source)
    }

    fn engine() -> AstDiffEngine {
        AstDiffEngine::default()
    }

    fn patterns(old: &str, new: &str) -> Vec<ChangePattern> {
        let (a, b) = (snap("1", old), snap("2", new));
        let diff = engine().compute_diff(&a, &b);
        engine().classify_change_patterns(&diff, &a, &b)
    }

    mod diffing {
        use super::*;

        #[test]
        fn test_equal_hash_means_no_changes() {
            let a = snap("same", "export function f(a: number) {}");
            let b = snap("same", "export function f(a: string, b: number) {}");
            let diff = engine().compute_diff(&a, &b);
            assert!(diff.is_empty());
            assert_eq!(diff.unchanged.len(), 1);
        }

        #[test]
        fn test_added_removed_modified_unchanged() {
            let a = snap("1", "function keep() {}\nfunction gone() {}\nfunction edit(a: number) {}");
            let b = snap("2", "function keep() {}\nfunction fresh() {}\nfunction edit(a: string) {}");
            let diff = engine().compute_diff(&a, &b);

            assert_eq!(diff.added.len(), 1);
            assert_eq!(diff.added[0].name, "fresh");
            assert_eq!(diff.removed[0].name, "gone");
            assert_eq!(diff.modified[0].key.name, "edit");
            assert_eq!(diff.unchanged.len(), 1);
            assert!(diff
                .change_tags()
                .contains(&"function:edit:parameter_type_changed:a:number->string".to_string()));
        }

        #[test]
        fn test_body_only_change_is_unchanged() {
            let a = snap("1", "export function f(a: number) { return a; }");
            let b = snap("2", "export function f(a: number) { return a + 1; }");
            let diff = engine().compute_diff(&a, &b);
            assert!(diff.is_empty());
        }

        #[test]
        fn test_same_name_different_kind_are_distinct() {
            let a = snap("1", "interface Foo {}");
            let b = snap("2", "class Foo {}");
            let diff = engine().compute_diff(&a, &b);
            assert_eq!(diff.added.len(), 1);
            assert_eq!(diff.removed.len(), 1);
        }
    }

    mod classification {
        use super::*;

        fn max_score(patterns: &[ChangePattern]) -> f64 {
            patterns.iter().map(|p| p.risk_score).fold(0.0, f64::max)
        }

        #[test]
        fn test_exported_removal_outscores_internal_removal() {
            let exported = patterns("export function f(a: number) {}\nfunction g() {}", "function g() {}");
            let internal = patterns("function f(a: number) {}\nfunction g() {}", "function g() {}");
            assert_eq!(exported[0].kind, ChangePatternKind::ExportRemoved);
            assert_eq!(internal[0].kind, ChangePatternKind::NodeRemoved);
            assert!(max_score(&exported) > max_score(&internal));
        }

        #[test]
        fn test_added_required_parameter_is_breaking() {
            let p = patterns(
                "export function add(a: number, b: number): number { return a + b; }",
                "export function add(a: number, b: number, c: number): number { return a + b + c; }",
            );
            let breaking = p.iter().find(|p| p.kind == ChangePatternKind::ParameterBreaking).unwrap();
            assert_eq!(breaking.risk_score, 85.0);
            assert!(breaking.description.contains("parameter_added:c"));
        }

        #[test]
        fn test_optional_parameter_is_additive() {
            let p = patterns(
                "export function f(a: number) {}",
                "export function f(a: number, b?: number) {}",
            );
            assert_eq!(p.len(), 1);
            assert_eq!(p[0].kind, ChangePatternKind::ParameterAdditive);
            assert!(p[0].risk_score <= 30.0);
        }

        #[test]
        fn test_rename_is_low_risk() {
            let p = patterns("export function f(a: number) {}", "export function f(x: number) {}");
            assert_eq!(p.len(), 1);
            assert_eq!(p[0].kind, ChangePatternKind::ParameterRenamed);
            assert_eq!(p[0].risk_score, 10.0);
        }

        #[test]
        fn test_return_base_type_change() {
            let exported = patterns(
                "export function f(): number { return 1; }",
                "export function f(): string { return ''; }",
            );
            assert_eq!(exported[0].kind, ChangePatternKind::ReturnTypeChanged);
            assert_eq!(exported[0].risk_score, 90.0);

            let internal = patterns("function f(): number { return 1; }", "function f(): string { return ''; }");
            assert_eq!(internal[0].risk_score, 60.0);

            let generic = patterns(
                "export function f(): Promise<number> {}",
                "export function f(): Promise<string> {}",
            );
            assert_eq!(generic[0].risk_score, 45.0);
        }

        #[test]
        fn test_interface_change() {
            let p = patterns(
                "export interface User { id: number }",
                "export interface User { id: string }",
            );
            assert_eq!(p[0].kind, ChangePatternKind::TypeDefinitionChanged);
            assert_eq!(p[0].risk_score, 75.0);
        }

        #[test]
        fn test_new_export_is_low() {
            let p = patterns("export function f() {}", "export function f() {}\nexport function g() {}");
            assert_eq!(p.len(), 1);
            assert_eq!(p[0].kind, ChangePatternKind::ExportAdded);
            assert_eq!(p[0].risk_score, 20.0);
        }

        #[test]
        fn test_unexporting_is_export_removal() {
            let p = patterns("export function f() {}", "function f() {}");
            assert!(p.iter().any(|p| p.kind == ChangePatternKind::ExportRemoved && p.exported));
        }
    }

    #[test]
    fn test_similarity_bounds() {
        let a = snap("1", "function a() {}\nfunction b() {}");
        let b = snap("2", "function a() {}\nfunction c() {}\nfunction d() {}");
        let s = engine().compute_similarity(&a, &b);
        assert!((s - 1.0 / 3.0).abs() < 1e-9);

        let empty = snap("3", "");
        assert_eq!(engine().compute_similarity(&empty, &snap("4", "")), 0.0);
        assert_eq!(engine().compute_similarity(&a, &a), 1.0);
    }

    #[test]
    fn test_control_flow_edit_distance() {
        let a = snap("1", "function a() {}\nfunction b() {}\nfunction c() {}");
        let b = snap("2", "function a() {}\nfunction c() {}\nfunction d() {}");
        let change = engine().detect_control_flow_changes(&a, &b);

        // [a, b, c] -> [a, c, d]
        assert_eq!(change.distance, 2);
        assert_eq!(change.deleted, vec!["function:b"]);
        assert_eq!(change.inserted, vec!["function:d"]);
        assert_eq!(change.risk_score, 20.0);
    }

    #[test]
    fn test_control_flow_substitution_and_cap() {
        let a = snap("1", "function a() {}");
        let b = snap("2", "function z() {}");
        let change = engine().detect_control_flow_changes(&a, &b);
        assert_eq!(change.distance, 1);
        assert_eq!(
            change.substituted,
            vec![("function:a".to_string(), "function:z".to_string())]
        );

        let many: String = (0..12).map(|i| format!("function f{}() {{}}\n", i)).collect();
        let capped = engine().detect_control_flow_changes(&snap("3", ""), &snap("4", &many));
        assert_eq!(capped.distance, 12);
        assert_eq!(capped.risk_score, 100.0);
    }
}
