//! Blast-radius analysis over the dependency graph.
//!
//! Impact flows from a changed file to its dependents. Each reached file keeps
//! the shallowest depth at which it was seen, so breadth-first and depth-first
//! traversal agree on the affected set and on every heat value.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::ImpactWeights;
use crate::graph::dependency::find_strongly_connected_components;
use crate::index::DependencyGraph;

/// Upper bound on paths returned by [`ImpactAnalyzer::compute_reachability`]
pub const MAX_REACHABILITY_PATHS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactOptions {
    pub use_dfs: bool,
    pub include_heat_map: bool,
}

impl Default for ImpactOptions {
    fn default() -> Self {
        Self {
            use_dfs: false,
            include_heat_map: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTier {
    Direct,
    Circular,
    Transitive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub changed_files: Vec<String>,
    /// Dependents reached from the changed set, changed files excluded, sorted
    pub affected_files: Vec<String>,
    /// Discovery order of the traversal
    pub traversal_order: Vec<String>,
    /// Shallowest depth per affected file
    pub depths: BTreeMap<String, usize>,
    pub tiers: BTreeMap<String, ImpactTier>,
    /// Affected files inside a strongly connected component
    pub circular_files: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub heat_map: BTreeMap<String, f64>,
    /// Sum of affected heat over the number of tracked files
    pub impact_score: f64,
}

/// Per-file view served by the query surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImpact {
    pub path: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub circular: bool,
    pub heat_map: BTreeMap<String, f64>,
}

pub struct ImpactAnalyzer {
    weights: ImpactWeights,
    max_depth: usize,
}

impl ImpactAnalyzer {
    pub fn new(weights: ImpactWeights, max_depth: usize) -> Self {
        Self { weights, max_depth }
    }

    fn weight(&self, tier: ImpactTier) -> f64 {
        match tier {
            ImpactTier::Direct => self.weights.direct,
            ImpactTier::Circular => self.weights.circular,
            ImpactTier::Transitive => self.weights.transitive,
        }
    }

    /// Walks dependents from `changed_files`.
    ///
    /// Heat of a file reached at depth `d` is `weight(tier) / (d + 1)`, where
    /// the tier is direct at depth 1, circular for files in a strongly
    /// connected component and transitive otherwise. Changed files carry heat
    /// 1.0 and the map is normalized by its maximum.
    pub fn analyze_impact_from_dependency_graph(
        &self,
        graph: &DependencyGraph,
        changed_files: &[String],
        options: &ImpactOptions,
    ) -> ImpactResult {
        let scc_members: HashSet<String> = find_strongly_connected_components(graph)
            .into_iter()
            .flatten()
            .collect();

        let changed: BTreeSet<&str> = changed_files.iter().map(|s| s.as_str()).collect();
        let mut best: BTreeMap<String, usize> = BTreeMap::new();
        let mut traversal_order = Vec::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();

        for path in &changed {
            best.insert(path.to_string(), 0);
            frontier.push_back((path.to_string(), 0));
        }

        while let Some((node, depth)) = if options.use_dfs {
            frontier.pop_back()
        } else {
            frontier.pop_front()
        } {
            if best.get(&node).is_some_and(|&b| b < depth) {
                continue;
            }
            if depth >= self.max_depth {
                continue;
            }
            for dependent in graph.dependents_of(&node) {
                let next = depth + 1;
                let improves = best.get(dependent).map_or(true, |&b| next < b);
                if improves {
                    if !best.contains_key(dependent) && !changed.contains(dependent.as_str()) {
                        traversal_order.push(dependent.clone());
                    }
                    best.insert(dependent.clone(), next);
                    frontier.push_back((dependent.clone(), next));
                }
            }
        }

        let mut result = ImpactResult {
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
            traversal_order,
            ..Default::default()
        };

        let mut raw_heat: BTreeMap<String, f64> = BTreeMap::new();
        for (path, depth) in &best {
            if changed.contains(path.as_str()) {
                raw_heat.insert(path.clone(), 1.0);
                continue;
            }
            let tier = if *depth == 1 {
                ImpactTier::Direct
            } else if scc_members.contains(path) {
                ImpactTier::Circular
            } else {
                ImpactTier::Transitive
            };
            if scc_members.contains(path) {
                result.circular_files.push(path.clone());
            }
            raw_heat.insert(path.clone(), self.weight(tier) / (*depth as f64 + 1.0));
            result.affected_files.push(path.clone());
            result.depths.insert(path.clone(), *depth);
            result.tiers.insert(path.clone(), tier);
        }

        let max = raw_heat.values().cloned().fold(0.0_f64, f64::max);
        if max > 0.0 {
            for value in raw_heat.values_mut() {
                *value /= max;
            }
        }
        for path in &changed {
            raw_heat.insert(path.to_string(), 1.0);
        }

        let affected_heat: f64 = result
            .affected_files
            .iter()
            .filter_map(|p| raw_heat.get(p))
            .sum();
        result.impact_score = if graph.nodes.is_empty() {
            0.0
        } else {
            affected_heat / graph.nodes.len() as f64
        };

        if options.include_heat_map {
            result.heat_map = raw_heat;
        }
        result
    }

    /// Every dependency path from a source to a target, each at most
    /// `max_depth` edges long and without repeated files
    pub fn compute_reachability(
        &self,
        graph: &DependencyGraph,
        sources: &[String],
        targets: &[String],
    ) -> Vec<Vec<String>> {
        let targets: HashSet<&str> = targets.iter().map(|s| s.as_str()).collect();
        let mut paths = Vec::new();

        for source in sources {
            let mut stack: Vec<Vec<&str>> = vec![vec![source.as_str()]];
            while let Some(path) = stack.pop() {
                if paths.len() >= MAX_REACHABILITY_PATHS {
                    return paths;
                }
                let Some(&last) = path.last() else {
                    continue;
                };
                if path.len() > 1 && targets.contains(last) {
                    paths.push(path.iter().map(|s| s.to_string()).collect());
                    continue;
                }
                if path.len() > self.max_depth {
                    continue;
                }
                for dep in graph.dependencies_of(last).iter().rev() {
                    if !path.contains(&dep.as_str()) {
                        let mut next = path.clone();
                        next.push(dep.as_str());
                        stack.push(next);
                    }
                }
            }
        }

        paths
    }

    /// Groups files joined by mutual (two-way) dependency edges.
    ///
    /// One-way edges never join files. Groups smaller than `min_size` are
    /// dropped; the rest are named `cluster-1`, `cluster-2`, ... in order of
    /// their first member.
    pub fn cluster_modules(&self, graph: &DependencyGraph, min_size: usize) -> BTreeMap<String, Vec<String>> {
        let paths: Vec<&str> = graph.nodes.keys().map(|k| k.as_str()).collect();
        let index: BTreeMap<&str, usize> = paths.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        let mut parent: Vec<usize> = (0..paths.len()).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for (a, node) in &graph.nodes {
            for b in &node.dependencies {
                if a < b && graph.has_edge(b, a) {
                    if let (Some(&ia), Some(&ib)) = (index.get(a.as_str()), index.get(b.as_str())) {
                        let (ra, rb) = (find(&mut parent, ia), find(&mut parent, ib));
                        if ra != rb {
                            parent[ra.max(rb)] = ra.min(rb);
                        }
                    }
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (i, path) in paths.iter().enumerate() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(path.to_string());
        }

        let mut clusters: Vec<Vec<String>> = groups
            .into_values()
            .filter(|members| members.len() >= min_size.max(2))
            .collect();
        clusters.sort();

        clusters
            .into_iter()
            .enumerate()
            .map(|(i, members)| (format!("cluster-{}", i + 1), members))
            .collect()
    }

    pub fn file_impact(&self, graph: &DependencyGraph, path: &str) -> Option<FileImpact> {
        let node = graph.nodes.get(path)?;
        let result = self.analyze_impact_from_dependency_graph(
            graph,
            &[path.to_string()],
            &ImpactOptions::default(),
        );
        let circular = graph.is_in_cycle(path)
            || find_strongly_connected_components(graph)
                .iter()
                .any(|c| c.iter().any(|p| p == path));

        Some(FileImpact {
            path: path.to_string(),
            dependencies: node.dependencies.clone(),
            dependents: node.dependents.clone(),
            circular,
            heat_map: result.heat_map,
        })
    }
}

impl Default for ImpactAnalyzer {
    fn default() -> Self {
        Self::new(ImpactWeights::default(), 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DependencyNode;

    /// Edges are `(from, to)`: `from` imports `to`
    fn graph(edges: &[(&str, &str)], isolated: &[&str]) -> DependencyGraph {
        let mut g = DependencyGraph::default();
        for path in isolated {
            g.nodes.insert(path.to_string(), DependencyNode::new(*path));
        }
        for (from, to) in edges {
            g.nodes
                .entry(from.to_string())
                .or_insert_with(|| DependencyNode::new(*from))
                .dependencies
                .push(to.to_string());
            g.nodes
                .entry(to.to_string())
                .or_insert_with(|| DependencyNode::new(*to))
                .dependents
                .push(from.to_string());
        }
        for node in g.nodes.values_mut() {
            node.dependencies.sort();
            node.dependents.sort();
        }
        g
    }

    fn changed(path: &str) -> Vec<String> {
        vec![path.to_string()]
    }

    #[test]
    fn test_impact_follows_dependents_transitively() {
        // b imports s, a imports b
        let g = graph(&[("b", "s"), ("a", "b")], &["x"]);
        let analyzer = ImpactAnalyzer::default();
        let result =
            analyzer.analyze_impact_from_dependency_graph(&g, &changed("s"), &ImpactOptions::default());

        assert_eq!(result.affected_files, vec!["a", "b"]);
        assert_eq!(result.depths["b"], 1);
        assert_eq!(result.depths["a"], 2);
        assert_eq!(result.tiers["b"], ImpactTier::Direct);
        assert_eq!(result.tiers["a"], ImpactTier::Transitive);
        assert!(!result.affected_files.contains(&"x".to_string()));
    }

    #[test]
    fn test_bfs_and_dfs_agree() {
        let g = graph(
            &[("b", "s"), ("c", "s"), ("a", "b"), ("a", "c"), ("d", "a"), ("e", "d"), ("d", "e")],
            &[],
        );
        let analyzer = ImpactAnalyzer::default();
        let bfs = analyzer.analyze_impact_from_dependency_graph(&g, &changed("s"), &ImpactOptions::default());
        let dfs = analyzer.analyze_impact_from_dependency_graph(
            &g,
            &changed("s"),
            &ImpactOptions {
                use_dfs: true,
                include_heat_map: true,
            },
        );

        assert_eq!(bfs.affected_files, dfs.affected_files);
        assert_eq!(bfs.heat_map, dfs.heat_map);
        assert_eq!(bfs.depths, dfs.depths);
    }

    #[test]
    fn test_heat_is_normalized_and_ordered() {
        let g = graph(&[("b", "s"), ("a", "b")], &[]);
        let result = ImpactAnalyzer::default().analyze_impact_from_dependency_graph(
            &g,
            &changed("s"),
            &ImpactOptions::default(),
        );

        assert_eq!(result.heat_map["s"], 1.0);
        assert!(result.heat_map["b"] > result.heat_map["a"]);
        assert!(result.heat_map.values().all(|h| (0.0..=1.0).contains(h)));
        // (0.5 + 0.5/3) / 3 files
        assert!((result.impact_score - (0.5 + 0.5 / 3.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_scc_members_get_circular_tier() {
        // a <-> c, and a imports b which imports s
        let g = graph(&[("b", "s"), ("a", "b"), ("a", "c"), ("c", "a")], &[]);
        let result = ImpactAnalyzer::default().analyze_impact_from_dependency_graph(
            &g,
            &changed("s"),
            &ImpactOptions::default(),
        );

        assert_eq!(result.tiers["a"], ImpactTier::Circular);
        assert_eq!(result.tiers["c"], ImpactTier::Circular);
        assert_eq!(result.circular_files, vec!["a", "c"]);
    }

    #[test]
    fn test_cycle_terminates() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")], &[]);
        let result = ImpactAnalyzer::default().analyze_impact_from_dependency_graph(
            &g,
            &changed("a"),
            &ImpactOptions {
                use_dfs: true,
                include_heat_map: false,
            },
        );
        assert_eq!(result.affected_files, vec!["b", "c"]);
        assert!(result.heat_map.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let g = graph(&[("b", "s"), ("a", "b")], &[]);
        let result = ImpactAnalyzer::new(ImpactWeights::default(), 1).analyze_impact_from_dependency_graph(
            &g,
            &changed("s"),
            &ImpactOptions::default(),
        );
        assert_eq!(result.affected_files, vec!["b"]);
    }

    #[test]
    fn test_unknown_changed_file() {
        let g = graph(&[("b", "s")], &[]);
        let result = ImpactAnalyzer::default().analyze_impact_from_dependency_graph(
            &g,
            &changed("gone"),
            &ImpactOptions::default(),
        );
        assert!(result.affected_files.is_empty());
        assert_eq!(result.impact_score, 0.0);
    }

    #[test]
    fn test_reachability_returns_all_paths() {
        let g = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")], &[]);
        let paths = ImpactAnalyzer::default().compute_reachability(&g, &changed("a"), &changed("d"));
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&vec!["a".to_string(), "b".to_string(), "d".to_string()]));
        assert!(paths.contains(&vec!["a".to_string(), "c".to_string(), "d".to_string()]));
    }

    #[test]
    fn test_reachability_through_cycle() {
        let g = graph(&[("a", "b"), ("b", "a"), ("b", "c")], &[]);
        let paths = ImpactAnalyzer::default().compute_reachability(&g, &changed("a"), &changed("c"));
        assert_eq!(paths, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_clusters_need_mutual_edges() {
        let g = graph(&[("a", "b"), ("b", "c")], &[]);
        assert!(ImpactAnalyzer::default().cluster_modules(&g, 2).is_empty());
    }

    #[test]
    fn test_clusters_group_mutual_edges() {
        let g = graph(
            &[("a", "b"), ("b", "a"), ("b", "c"), ("c", "b"), ("x", "y"), ("y", "x"), ("z", "a")],
            &[],
        );
        let clusters = ImpactAnalyzer::default().cluster_modules(&g, 2);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters["cluster-1"], vec!["a", "b", "c"]);
        assert_eq!(clusters["cluster-2"], vec!["x", "y"]);

        let large_only = ImpactAnalyzer::default().cluster_modules(&g, 3);
        assert_eq!(large_only.len(), 1);
    }

    #[test]
    fn test_file_impact() {
        let g = graph(&[("b", "s"), ("s", "b"), ("a", "s")], &[]);
        let impact = ImpactAnalyzer::default().file_impact(&g, "s").unwrap();
        assert_eq!(impact.dependencies, vec!["b"]);
        assert_eq!(impact.dependents, vec!["a", "b"]);
        assert!(impact.circular);
        assert_eq!(impact.heat_map["s"], 1.0);
        assert!(ImpactAnalyzer::default().file_impact(&g, "missing").is_none());
    }
}
