//! Kosaraju strongly-connected components over string-keyed adjacency.
//!
//! Both passes use explicit stacks, so import graphs of any depth are safe.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Components with more than one member, each sorted, sorted by first member.
///
/// `nodes` fixes the vertex set; edges to unknown vertices are ignored.
pub fn strongly_connected_components<'a, F, I>(nodes: &[&'a str], successors: F) -> Vec<Vec<String>>
where
    F: Fn(&'a str) -> I,
    I: IntoIterator<Item = &'a str>,
{
    let known: HashSet<&str> = nodes.iter().copied().collect();
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for &node in nodes {
        let targets: Vec<&str> = successors(node)
            .into_iter()
            .filter(|t| known.contains(t))
            .collect();
        for &target in &targets {
            reverse.entry(target).or_default().push(node);
        }
        forward.insert(node, targets);
    }

    // first pass: finish order
    let mut visited: HashSet<&str> = HashSet::new();
    let mut order: Vec<&str> = Vec::with_capacity(nodes.len());
    for &start in nodes {
        if !visited.insert(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        while let Some((node, idx)) = stack.pop() {
            let next = forward.get(node).and_then(|targets| targets.get(idx)).copied();
            match next {
                Some(target) => {
                    stack.push((node, idx + 1));
                    if visited.insert(target) {
                        stack.push((target, 0));
                    }
                }
                None => order.push(node),
            }
        }
    }

    // second pass: reverse graph in reverse finish order
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    for &start in order.iter().rev() {
        if !assigned.insert(start) {
            continue;
        }
        let mut component = vec![start];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &source in reverse.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
                if assigned.insert(source) {
                    component.push(source);
                    stack.push(source);
                }
            }
        }
        if component.len() > 1 {
            let mut members: Vec<String> = component.into_iter().map(|s| s.to_string()).collect();
            members.sort();
            components.push(members);
        }
    }

    components.sort();
    components
}

/// Convenience wrapper over an adjacency map
pub fn sccs_of_map(adjacency: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    let nodes: Vec<&str> = adjacency.keys().map(|k| k.as_str()).collect();
    strongly_connected_components(&nodes, |node| {
        adjacency
            .get(node)
            .into_iter()
            .flat_map(|targets| targets.iter().map(|t| t.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(edges: &[(&str, &str)], extra: &[&str]) -> BTreeMap<String, BTreeSet<String>> {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in extra {
            map.entry(node.to_string()).or_default();
        }
        for (from, to) in edges {
            map.entry(from.to_string()).or_default().insert(to.to_string());
            map.entry(to.to_string()).or_default();
        }
        map
    }

    #[test]
    fn test_triangle_is_one_component() {
        let map = adjacency(&[("a", "b"), ("b", "c"), ("c", "a")], &[]);
        assert_eq!(sccs_of_map(&map), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_linear_chain_has_no_components() {
        let map = adjacency(&[("a", "b"), ("b", "c")], &[]);
        assert!(sccs_of_map(&map).is_empty());
    }

    #[test]
    fn test_self_loop_not_reported() {
        let map = adjacency(&[("a", "a"), ("a", "b")], &[]);
        assert!(sccs_of_map(&map).is_empty());
    }

    #[test]
    fn test_two_separate_components() {
        let map = adjacency(
            &[("a", "b"), ("b", "a"), ("c", "d"), ("d", "c"), ("b", "c")],
            &["e"],
        );
        assert_eq!(sccs_of_map(&map), vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let names: Vec<String> = (0..20_000).map(|i| format!("n{}", i)).collect();
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pair in names.windows(2) {
            map.entry(pair[0].clone()).or_default().insert(pair[1].clone());
        }
        map.entry(names[names.len() - 1].clone())
            .or_default()
            .insert(names[0].clone());

        let components = sccs_of_map(&map);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 20_000);
    }
}
