//! File-level dependency graph construction.
//!
//! Import specifiers are resolved against the set of tracked files only; the
//! filesystem is never consulted, so a graph can be rebuilt from stored ASTs
//! alone.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::Result;
use crate::graph::scc;
use crate::index::{keys, read_json, write_json, AstSnapshot, BlobStore, DependencyGraph, DependencyNode};

/// Extensions tried, in order, when an import omits one
pub const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "cts", "mjs", "cjs"];

const STRENGTH_PATH_DEPTH: usize = 5;
const STRENGTH_PATH_CAP: usize = 5;

/// Default bound on cycle search paths, in files
pub const DEFAULT_CYCLE_DEPTH: usize = 64;

pub struct DependencyMapper {
    store: Arc<dyn BlobStore>,
    cache: Option<DependencyGraph>,
    max_depth: usize,
}

impl DependencyMapper {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            cache: None,
            max_depth: DEFAULT_CYCLE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Builds a graph from per-file ASTs keyed by project-relative path
    pub fn build_graph(&self, asts: &BTreeMap<String, AstSnapshot>) -> DependencyGraph {
        let known: BTreeSet<&str> = asts.keys().map(|k| k.as_str()).collect();
        let mut forward: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut external_imports: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (path, ast) in asts {
            let deps = forward.entry(path.clone()).or_default();
            for import in &ast.imports {
                let resolved = if import.is_external {
                    None
                } else {
                    resolve_import(path, &import.source, &known)
                };
                match resolved {
                    Some(target) if &target != path => {
                        deps.insert(target);
                    }
                    Some(_) => {}
                    None => {
                        let entry = external_imports.entry(path.clone()).or_default();
                        if !entry.contains(&import.source) {
                            entry.push(import.source.clone());
                        }
                    }
                }
            }
        }

        let mut nodes: BTreeMap<String, DependencyNode> = forward
            .keys()
            .map(|path| {
                let mut node = DependencyNode::new(path.clone());
                node.external = external_imports.contains_key(path);
                (path.clone(), node)
            })
            .collect();

        for (path, deps) in &forward {
            for dep in deps {
                if let Some(target) = nodes.get_mut(dep) {
                    target.dependents.push(path.clone());
                }
            }
            if let Some(node) = nodes.get_mut(path) {
                node.dependencies = deps.iter().cloned().collect();
            }
        }
        for node in nodes.values_mut() {
            node.dependents.sort();
            node.dependents.dedup();
        }

        let mut graph = DependencyGraph {
            nodes,
            cycles: Vec::new(),
            external_imports,
        };
        graph.cycles = detect_cycles(&graph, self.max_depth);

        tracing::debug!(
            "Built dependency graph: {} files, {} edges, {} cycles",
            graph.nodes.len(),
            graph.edge_count(),
            graph.cycles.len()
        );
        graph
    }

    /// Persists the graph and replaces the cached copy
    pub fn save_graph(&mut self, graph: &DependencyGraph) -> Result<()> {
        write_json(self.store.as_ref(), keys::GRAPH, graph)?;
        self.cache = Some(graph.clone());
        Ok(())
    }

    pub fn load_graph(&self) -> Option<DependencyGraph> {
        read_json(self.store.as_ref(), keys::GRAPH)
    }

    /// Cached graph, loaded from storage on first use.
    ///
    /// The cache is not coherent with storage: anything that rewrites the
    /// graph behind this mapper must call [`invalidate_cache`](Self::invalidate_cache).
    pub fn get_cached_graph(&mut self) -> Option<&DependencyGraph> {
        if self.cache.is_none() {
            self.cache = self.load_graph();
        }
        self.cache.as_ref()
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }
}

/// Resolves a relative or root-anchored specifier imported from `from_file`.
///
/// Order: the joined path as written, then with each extension, then
/// `<path>/index.<ext>`, then the same three against the project root.
/// Specifiers that climb above the root never resolve.
pub fn resolve_import(from_file: &str, source: &str, known: &BTreeSet<&str>) -> Option<String> {
    let dir = match from_file.rfind('/') {
        Some(idx) => &from_file[..idx],
        None => "",
    };

    let local = if source.starts_with('/') {
        None
    } else {
        normalize(dir, source)
    };
    let rooted = normalize("", source.trim_start_matches('/'));

    local
        .iter()
        .chain(rooted.iter())
        .find_map(|base| probe(base, known))
}

fn probe(base: &str, known: &BTreeSet<&str>) -> Option<String> {
    if base.is_empty() {
        return None;
    }
    if known.contains(base) {
        return Some(base.to_string());
    }

    // `./util.js` written against `util.ts`
    if let Some((stem, ext)) = base.rsplit_once('.') {
        let swapped: &[&str] = match ext {
            "js" => &["ts", "tsx"],
            "jsx" => &["tsx"],
            "mjs" => &["mts"],
            "cjs" => &["cts"],
            _ => &[],
        };
        for alt in swapped {
            let candidate = format!("{}.{}", stem, alt);
            if known.contains(candidate.as_str()) {
                return Some(candidate);
            }
        }
    }

    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}.{}", base, ext);
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{}/index.{}", base, ext);
        if known.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

/// Lexically joins `dir` and `rel`; `None` when the result leaves the root
fn normalize(dir: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Elementary cycles, found by a depth-first search from every file with a
/// visited set local to the current path.
///
/// A search from `start` only walks files ordered after it, so each cycle is
/// reported once, rotated to begin at its smallest member. Paths longer than
/// `max_depth` files are cut. Cycles with the same membership are reported
/// once.
pub fn detect_cycles(graph: &DependencyGraph, max_depth: usize) -> Vec<Vec<String>> {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut cycles = Vec::new();

    for start in graph.nodes.keys() {
        let start = start.as_str();
        let mut path: Vec<&str> = vec![start];
        let mut on_path: HashSet<&str> = HashSet::from([start]);
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];

        while let Some((node, idx)) = stack.pop() {
            let Some(next) = graph.dependencies_of(node).get(idx) else {
                on_path.remove(node);
                path.pop();
                continue;
            };
            stack.push((node, idx + 1));
            let next = next.as_str();

            if next == start {
                let cycle: Vec<String> = path.iter().map(|p| p.to_string()).collect();
                let mut key = cycle.clone();
                key.sort();
                if seen.insert(key) {
                    cycles.push(cycle);
                }
            } else if next > start && !on_path.contains(next) && path.len() < max_depth {
                on_path.insert(next);
                path.push(next);
                stack.push((next, 0));
            }
        }
    }

    cycles
}

/// Strongly connected components with more than one file
pub fn find_strongly_connected_components(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let nodes: Vec<&str> = graph.nodes.keys().map(|k| k.as_str()).collect();
    scc::strongly_connected_components(&nodes, |node| {
        graph.dependencies_of(node).iter().map(|d| d.as_str())
    })
}

/// Heuristic coupling score in `[0, 1]`.
///
/// Weighted blend: direct edge in either direction (0.4), edges in both
/// directions (0.2), number of dependency paths of length at most 5 between
/// the two files, saturating at 5 (0.2), and the Jaccard overlap of their
/// dependency sets (0.2). Not a formal metric.
pub fn calculate_dependency_strength(graph: &DependencyGraph, a: &str, b: &str) -> f64 {
    if a == b || !graph.nodes.contains_key(a) || !graph.nodes.contains_key(b) {
        return 0.0;
    }

    let ab = graph.has_edge(a, b);
    let ba = graph.has_edge(b, a);
    let direct = if ab || ba { 1.0 } else { 0.0 };
    let bidirectional = if ab && ba { 1.0 } else { 0.0 };

    let paths = count_paths(graph, a, b, STRENGTH_PATH_CAP)
        + count_paths(graph, b, a, STRENGTH_PATH_CAP);
    let path_score = (paths.min(STRENGTH_PATH_CAP) as f64) / STRENGTH_PATH_CAP as f64;

    let deps_a: HashSet<&String> = graph.dependencies_of(a).iter().collect();
    let deps_b: HashSet<&String> = graph.dependencies_of(b).iter().collect();
    let union = deps_a.union(&deps_b).count();
    let shared = if union == 0 {
        0.0
    } else {
        deps_a.intersection(&deps_b).count() as f64 / union as f64
    };

    (0.4 * direct + 0.2 * bidirectional + 0.2 * path_score + 0.2 * shared).clamp(0.0, 1.0)
}

/// Simple paths `from -> to` no longer than the strength depth, stopping at `cap`
fn count_paths(graph: &DependencyGraph, from: &str, to: &str, cap: usize) -> usize {
    let mut count = 0;
    let mut stack: Vec<(&str, Vec<&str>)> = vec![(from, vec![from])];

    while let Some((node, path)) = stack.pop() {
        if count >= cap {
            break;
        }
        if path.len() > STRENGTH_PATH_DEPTH {
            continue;
        }
        for dep in graph.dependencies_of(node) {
            if dep == to {
                count += 1;
            } else if !path.contains(&dep.as_str()) {
                let mut next = path.clone();
                next.push(dep.as_str());
                stack.push((dep.as_str(), next));
            }
        }
    }
    count
}
