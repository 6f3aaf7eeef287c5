//! Code property graph: declarations as nodes, with syntax, order, call,
//! data-flow, import and export relations between them.
//!
//! The graph is built from stored ASTs plus the file dependency graph, so it is
//! a strict refinement of the latter: every file edge reappears as an import
//! edge. Statement and expression level nodes are not materialized.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::graph::scc;
use crate::index::{AstNode, AstSnapshot, DependencyGraph, NodeKind};

static TYPE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpgNodeKind {
    File,
    Function,
    Class,
    Variable,
    /// Interfaces, type aliases and enums
    Type,
}

impl From<NodeKind> for CpgNodeKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Function => CpgNodeKind::Function,
            NodeKind::Class => CpgNodeKind::Class,
            NodeKind::Variable => CpgNodeKind::Variable,
            NodeKind::Interface | NodeKind::Type | NodeKind::Enum => CpgNodeKind::Type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpgEdgeKind {
    /// File contains declaration
    Syntax,
    /// Declaration order within a file
    ControlFlow,
    /// Function signature mentions a type
    DataFlow,
    Call,
    Import,
    Export,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpgNode {
    pub id: String,
    pub kind: CpgNodeKind,
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CpgEdge {
    pub from: String,
    pub to: String,
    pub kind: CpgEdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodePropertyGraph {
    pub nodes: BTreeMap<String, CpgNode>,
    pub edges: Vec<CpgEdge>,
    /// file path -> ids of the file node and its declarations
    pub file_index: BTreeMap<String, Vec<String>>,
}

pub fn file_node_id(path: &str) -> String {
    format!("file:{}", path)
}

pub fn decl_node_id(path: &str, node: &AstNode) -> String {
    format!("{}#{}:{}", path, node.kind, node.name)
}

impl CodePropertyGraph {
    pub fn build(asts: &BTreeMap<String, AstSnapshot>, graph: &DependencyGraph) -> Self {
        let mut cpg = CodePropertyGraph::default();
        let mut edges: BTreeSet<CpgEdge> = BTreeSet::new();

        for (path, ast) in asts {
            let file_id = file_node_id(path);
            cpg.nodes.insert(
                file_id.clone(),
                CpgNode {
                    id: file_id.clone(),
                    kind: CpgNodeKind::File,
                    name: path.clone(),
                    file: path.clone(),
                    line: 0,
                    exported: false,
                },
            );
            let mut ids = vec![file_id.clone()];

            let mut ordered: Vec<&AstNode> = ast.nodes.iter().collect();
            ordered.sort_by_key(|n| n.location.start_offset);

            let mut previous: Option<String> = None;
            for node in ordered {
                let id = decl_node_id(path, node);
                cpg.nodes.insert(
                    id.clone(),
                    CpgNode {
                        id: id.clone(),
                        kind: node.kind.into(),
                        name: node.name.clone(),
                        file: path.clone(),
                        line: node.location.line,
                        exported: node.is_exported(),
                    },
                );
                edges.insert(edge(&file_id, &id, CpgEdgeKind::Syntax));
                if node.is_exported() {
                    edges.insert(edge(&file_id, &id, CpgEdgeKind::Export));
                }
                if let Some(prev) = previous.replace(id.clone()) {
                    if prev != id {
                        edges.insert(edge(&prev, &id, CpgEdgeKind::ControlFlow));
                    }
                }
                ids.push(id);
            }
            ids.dedup();
            cpg.file_index.insert(path.clone(), ids);
        }

        for (path, node) in &graph.nodes {
            for dep in &node.dependencies {
                if asts.contains_key(dep) {
                    edges.insert(edge(&file_node_id(path), &file_node_id(dep), CpgEdgeKind::Import));
                }
            }
        }

        for (path, ast) in asts {
            let deps = graph.dependencies_of(path);
            for node in &ast.nodes {
                let from = decl_node_id(path, node);

                for callee in &node.calls {
                    if let Some(target) = resolve_symbol(asts, path, deps, callee, |n| {
                        matches!(n.kind, NodeKind::Function | NodeKind::Class | NodeKind::Variable)
                    }) {
                        if target != from {
                            edges.insert(edge(&from, &target, CpgEdgeKind::Call));
                        }
                    }
                }

                let mut type_text = String::new();
                for param in node.parameters.iter().flatten() {
                    if let Some(ty) = &param.type_annotation {
                        type_text.push_str(ty);
                        type_text.push(' ');
                    }
                }
                if let Some(ret) = &node.return_type {
                    type_text.push_str(ret);
                }
                let mentioned: BTreeSet<&str> =
                    TYPE_IDENT.find_iter(&type_text).map(|m| m.as_str()).collect();
                for name in mentioned {
                    if let Some(target) = resolve_symbol(asts, path, deps, name, |n| {
                        matches!(
                            n.kind,
                            NodeKind::Interface | NodeKind::Type | NodeKind::Enum | NodeKind::Class
                        )
                    }) {
                        if target != from {
                            edges.insert(edge(&from, &target, CpgEdgeKind::DataFlow));
                        }
                    }
                }
            }
        }

        cpg.edges = edges.into_iter().collect();
        tracing::debug!(
            "Built property graph: {} nodes, {} edges",
            cpg.nodes.len(),
            cpg.edges.len()
        );
        cpg
    }

    /// Node ids matching `query`: an exact id, a file path, or a declaration name
    pub fn resolve(&self, query: &str) -> Vec<String> {
        if self.nodes.contains_key(query) {
            return vec![query.to_string()];
        }
        let file_id = file_node_id(query);
        if self.nodes.contains_key(&file_id) {
            return vec![file_id];
        }
        self.nodes
            .values()
            .filter(|n| n.kind != CpgNodeKind::File && n.name == query)
            .map(|n| n.id.clone())
            .collect()
    }

    fn edges_of(&self, kind: CpgEdgeKind) -> impl Iterator<Item = &CpgEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Declarations with a call edge into `symbol`
    pub fn find_callers(&self, symbol: &str) -> Vec<CpgNode> {
        let targets: HashSet<String> = self.resolve(symbol).into_iter().collect();
        let ids: BTreeSet<&str> = self
            .edges_of(CpgEdgeKind::Call)
            .filter(|e| targets.contains(&e.to))
            .map(|e| e.from.as_str())
            .collect();
        ids.into_iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }

    /// Declarations `symbol` calls
    pub fn find_callees(&self, symbol: &str) -> Vec<CpgNode> {
        let sources: HashSet<String> = self.resolve(symbol).into_iter().collect();
        let ids: BTreeSet<&str> = self
            .edges_of(CpgEdgeKind::Call)
            .filter(|e| sources.contains(&e.from))
            .map(|e| e.to.as_str())
            .collect();
        ids.into_iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }

    /// Simple paths of at most `max_depth` edges, following every relation
    /// except declaration order
    pub fn find_all_paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<String>> {
        let targets: HashSet<String> = self.resolve(to).into_iter().collect();
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for e in self.edges.iter().filter(|e| e.kind != CpgEdgeKind::ControlFlow) {
            adjacency.entry(e.from.as_str()).or_default().insert(e.to.as_str());
        }

        let mut paths = Vec::new();
        for start in self.resolve(from) {
            let mut stack: Vec<Vec<String>> = vec![vec![start]];
            while let Some(path) = stack.pop() {
                if paths.len() >= crate::graph::impact::MAX_REACHABILITY_PATHS {
                    return paths;
                }
                let Some(last) = path.last() else {
                    continue;
                };
                if path.len() > 1 && targets.contains(last) {
                    paths.push(path);
                    continue;
                }
                if path.len() > max_depth {
                    continue;
                }
                if let Some(next) = adjacency.get(last.as_str()) {
                    for n in next.iter().rev() {
                        if !path.iter().any(|p| p == n) {
                            let mut extended = path.clone();
                            extended.push(n.to_string());
                            stack.push(extended);
                        }
                    }
                }
            }
        }
        paths
    }

    /// Strongly connected components over call and import edges
    pub fn find_sccs(&self) -> Vec<Vec<String>> {
        let nodes: Vec<&str> = self.nodes.keys().map(|k| k.as_str()).collect();
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for e in &self.edges {
            if matches!(e.kind, CpgEdgeKind::Call | CpgEdgeKind::Import) {
                adjacency.entry(e.from.as_str()).or_default().push(e.to.as_str());
            }
        }
        scc::strongly_connected_components(&nodes, |node| {
            adjacency.get(node).into_iter().flatten().copied()
        })
    }

    /// Declarations outside `file` that call any of `symbols` declared in it
    pub fn external_callers(&self, file: &str, symbols: &BTreeSet<String>) -> Vec<CpgNode> {
        let targets: HashSet<&str> = self
            .file_index
            .get(file)
            .into_iter()
            .flatten()
            .filter(|id| self.nodes.get(id.as_str()).is_some_and(|n| symbols.contains(&n.name)))
            .map(|id| id.as_str())
            .collect();

        let ids: BTreeSet<&str> = self
            .edges_of(CpgEdgeKind::Call)
            .filter(|e| targets.contains(e.to.as_str()))
            .map(|e| e.from.as_str())
            .filter(|from| self.nodes.get(*from).is_some_and(|n| n.file != file))
            .collect();
        ids.into_iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }
}

fn edge(from: &str, to: &str, kind: CpgEdgeKind) -> CpgEdge {
    CpgEdge {
        from: from.to_string(),
        to: to.to_string(),
        kind,
    }
}

/// Looks `name` up in the same file first, then among exported declarations
/// of the file's dependencies
fn resolve_symbol(
    asts: &BTreeMap<String, AstSnapshot>,
    path: &str,
    deps: &[String],
    name: &str,
    accept: impl Fn(&AstNode) -> bool,
) -> Option<String> {
    if let Some(local) = asts
        .get(path)
        .and_then(|ast| ast.nodes.iter().find(|n| n.name == name && accept(n)))
    {
        return Some(decl_node_id(path, local));
    }
    deps.iter().find_map(|dep| {
        asts.get(dep).and_then(|ast| {
            ast.nodes
                .iter()
                .find(|n| n.name == name && n.is_exported() && accept(n))
                .map(|n| decl_node_id(dep, n))
        })
    })
}
