use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// =====================================================
// File index
// =====================================================

/// Per-file metadata recorded by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Project-relative path with forward slashes
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub line_count: usize,
    pub language: String,
    /// Filesystem modification time, unix millis
    pub last_modified: i64,
    /// Unix millis
    pub indexed_at: i64,
}

// =====================================================
// AST snapshot
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Enum,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Type => "type",
            NodeKind::Variable => "variable",
            NodeKind::Enum => "enum",
        }
    }

    /// Kinds that only exist at the type level
    pub fn is_type_like(&self) -> bool {
        matches!(self, NodeKind::Interface | NodeKind::Type)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_annotation: Option<&str>) -> Self {
        Self {
            name: name.into(),
            type_annotation: type_annotation.map(|t| t.to_string()),
            optional: false,
            default_value: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn render(&self) -> String {
        let mut out = self.name.clone();
        if self.optional && self.default_value.is_none() {
            out.push('?');
        }
        if let Some(ty) = &self.type_annotation {
            out.push_str(": ");
            out.push_str(ty);
        }
        if let Some(default) = &self.default_value {
            out.push_str(" = ");
            out.push_str(default);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start_offset: usize,
    pub end_offset: usize,
    /// 1-based
    pub line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: NodeKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<Parameter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Names this node is exported under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<String>>,
    #[serde(default)]
    pub location: SourceLocation,
    /// Names of functions called from the node body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

impl AstNode {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            signature: None,
            parameters: None,
            return_type: None,
            exports: None,
            location: SourceLocation::default(),
            calls: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.add_export(name);
        self
    }

    pub fn add_export(&mut self, name: impl Into<String>) {
        let name = name.into();
        let exports = self.exports.get_or_insert_with(Vec::new);
        if !exports.contains(&name) {
            exports.push(name);
        }
    }

    pub fn is_exported(&self) -> bool {
        self.exports.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// Identity of a node across versions of the same file.
///
/// Two nodes with the same kind and name are the same entity, whatever their
/// bodies look like. Overloads collapse onto one key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub name: String,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub source: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub is_external: bool,
    #[serde(default)]
    pub is_type_only: bool,
}

impl ImportInfo {
    pub fn new(source: impl Into<String>, names: Vec<String>) -> Self {
        let source = source.into();
        Self {
            is_external: is_external_specifier(&source),
            source,
            names,
            is_type_only: false,
        }
    }
}

/// Relative (`./`, `../`) and absolute (`/`) specifiers point into the tree
pub fn is_external_specifier(source: &str) -> bool {
    !(source.starts_with('.') || source.starts_with('/'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Enum,
    Default,
    ReExport,
}

impl From<NodeKind> for ExportKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Function => ExportKind::Function,
            NodeKind::Class => ExportKind::Class,
            NodeKind::Interface => ExportKind::Interface,
            NodeKind::Type => ExportKind::Type,
            NodeKind::Variable => ExportKind::Variable,
            NodeKind::Enum => ExportKind::Enum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub name: String,
    pub kind: ExportKind,
    #[serde(default)]
    pub is_type_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub column: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
        }
    }
}

/// Structural view of one file at one revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstSnapshot {
    pub file_path: String,
    pub hash: String,
    #[serde(default)]
    pub nodes: Vec<AstNode>,
    #[serde(default)]
    pub imports: Vec<ImportInfo>,
    #[serde(default)]
    pub exports: Vec<ExportInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_errors: Vec<ParseError>,
}

impl AstSnapshot {
    pub fn empty(file_path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            hash: hash.into(),
            nodes: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            parse_errors: Vec::new(),
        }
    }

    /// Every name this file exports, from both the export list and node marks
    pub fn export_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.exports.iter().map(|e| e.name.clone()).collect();
        for node in &self.nodes {
            if let Some(exports) = &node.exports {
                names.extend(exports.iter().cloned());
            }
        }
        names
    }

    /// Names of local declarations that are exported
    pub fn exported_symbols(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_exported())
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn has_exports(&self) -> bool {
        !self.exports.is_empty() || self.nodes.iter().any(|n| n.is_exported())
    }

    pub fn find_node(&self, kind: NodeKind, name: &str) -> Option<&AstNode> {
        self.nodes.iter().find(|n| n.kind == kind && n.name == name)
    }
}

// =====================================================
// Dependency graph
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub path: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub external: bool,
}

impl DependencyNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            external: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    #[serde(default)]
    pub nodes: BTreeMap<String, DependencyNode>,
    #[serde(default)]
    pub cycles: Vec<Vec<String>>,
    /// file -> import specifiers that did not resolve to a tracked file
    #[serde(default)]
    pub external_imports: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn dependencies_of(&self, path: &str) -> &[String] {
        self.nodes
            .get(path)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, path: &str) -> &[String] {
        self.nodes
            .get(path)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.dependencies_of(from).iter().any(|d| d == to)
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies.len()).sum()
    }

    pub fn is_in_cycle(&self, path: &str) -> bool {
        self.cycles.iter().any(|c| c.iter().any(|p| p == path))
    }

    /// `B ∈ deps(A) ⇔ A ∈ dependents(B)` for every edge
    pub fn is_consistent(&self) -> bool {
        let forward = self.nodes.values().all(|node| {
            node.dependencies.iter().all(|dep| {
                self.nodes
                    .get(dep)
                    .is_some_and(|d| d.dependents.contains(&node.path))
            })
        });
        let backward = self.nodes.values().all(|node| {
            node.dependents.iter().all(|dependent| {
                self.nodes
                    .get(dependent)
                    .is_some_and(|d| d.dependencies.contains(&node.path))
            })
        });
        forward && backward
    }
}

// =====================================================
// Snapshots
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    /// Unix millis
    pub timestamp: i64,
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
    #[serde(default)]
    pub asts: BTreeMap<String, AstSnapshot>,
    #[serde(default)]
    pub graph: DependencyGraph,
}

impl Snapshot {
    /// Ids sort in creation order: zero-padded millis, then a random suffix
    pub fn generate_id(timestamp: i64) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{:013}-{}", timestamp, &suffix[..8])
    }

    pub fn function_count(&self) -> usize {
        self.asts
            .values()
            .flat_map(|a| a.nodes.iter())
            .filter(|n| n.kind == NodeKind::Function)
            .count()
    }

    pub fn total_lines(&self) -> usize {
        self.files.values().map(|f| f.line_count).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

/// Out-of-band annotations for a snapshot id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,
}

impl SnapshotMetadata {
    pub fn new(snapshot_id: impl Into<String>) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            ..Default::default()
        }
    }
}

// =====================================================
// Change reports
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Risky,
    Breaking,
}

impl RiskLevel {
    pub const BREAKING_THRESHOLD: f64 = 80.0;
    pub const RISKY_THRESHOLD: f64 = 50.0;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::BREAKING_THRESHOLD {
            RiskLevel::Breaking
        } else if score >= Self::RISKY_THRESHOLD {
            RiskLevel::Risky
        } else {
            RiskLevel::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Risky => "RISKY",
            RiskLevel::Breaking => "BREAKING",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeType {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetailKind {
    ExportRemoved,
    SignatureChanged,
    ParameterChanged,
    ReturnTypeChanged,
    TypeChanged,
    InternalChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub kind: ChangeDetailKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default)]
    pub affected_symbols: Vec<String>,
    /// Pattern score after the internal-only adjustment
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub file_path: String,
    pub change_type: FileChangeType,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    #[serde(default)]
    pub changes: Vec<ChangeDetail>,
}

impl ChangeReport {
    pub fn is_breaking(&self) -> bool {
        self.risk_level == RiskLevel::Breaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Breaking);
        assert_eq!(RiskLevel::from_score(80.0), RiskLevel::Breaking);
        assert_eq!(RiskLevel::from_score(79.9), RiskLevel::Risky);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Risky);
        assert_eq!(RiskLevel::from_score(49.0), RiskLevel::Safe);
        assert!(RiskLevel::Breaking > RiskLevel::Risky);
        assert!(RiskLevel::Risky > RiskLevel::Safe);
    }

    #[test]
    fn test_risk_level_serializes_uppercase() {
        let json = serde_json::to_string(&RiskLevel::Breaking).unwrap();
        assert_eq!(json, "\"BREAKING\"");
    }

    #[test]
    fn test_parameter_render() {
        let p = Parameter::new("a", Some("number"));
        assert_eq!(p.render(), "a: number");

        let p = Parameter::new("b", Some("string")).optional();
        assert_eq!(p.render(), "b?: string");

        let mut p = Parameter::new("c", None).optional();
        p.default_value = Some("1".to_string());
        assert_eq!(p.render(), "c = 1");
    }

    #[test]
    fn test_node_exports() {
        let mut node = AstNode::new(NodeKind::Function, "add");
        assert!(!node.is_exported());
        node.add_export("add");
        node.add_export("add");
        assert!(node.is_exported());
        assert_eq!(node.exports.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_node_key_display() {
        let node = AstNode::new(NodeKind::Class, "User");
        assert_eq!(node.key().to_string(), "class:User");
    }

    #[test]
    fn test_external_specifier() {
        assert!(is_external_specifier("react"));
        assert!(is_external_specifier("@scope/pkg"));
        assert!(!is_external_specifier("./util"));
        assert!(!is_external_specifier("../lib/x"));
        assert!(!is_external_specifier("/src/x"));
    }

    #[test]
    fn test_snapshot_id_ordering() {
        let a = Snapshot::generate_id(1_000);
        let b = Snapshot::generate_id(2_000);
        assert!(a < b);
        assert_eq!(a.len(), 13 + 1 + 8);
    }

    #[test]
    fn test_graph_consistency() {
        let mut graph = DependencyGraph::default();
        let mut a = DependencyNode::new("a.ts");
        a.dependencies.push("b.ts".to_string());
        let mut b = DependencyNode::new("b.ts");
        b.dependents.push("a.ts".to_string());
        graph.nodes.insert("a.ts".to_string(), a);
        graph.nodes.insert("b.ts".to_string(), b);
        assert!(graph.is_consistent());

        graph.nodes.get_mut("b.ts").unwrap().dependents.clear();
        assert!(!graph.is_consistent());
    }

    #[test]
    fn test_export_names_merges_sources() {
        let mut snapshot = AstSnapshot::empty("a.ts", "h");
        snapshot.nodes.push(AstNode::new(NodeKind::Function, "f").with_export("f"));
        snapshot.exports.push(ExportInfo {
            name: "*".to_string(),
            kind: ExportKind::ReExport,
            is_type_only: false,
        });
        let names = snapshot.export_names();
        assert!(names.contains("f"));
        assert!(names.contains("*"));
        assert!(snapshot.has_exports());
    }
}
