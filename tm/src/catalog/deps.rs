//! Capability dependency graph
//!
//! Nodes are capability names. A name depends on the union of the
//! dependencies declared by every capability registered under that name.

use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Capability name -> names it depends on
pub(crate) type DepGraph = BTreeMap<String, BTreeSet<String>>;

/// Find a cycle, returning its path (first node repeated at the end)
pub(crate) fn find_cycle(graph: &DepGraph) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in graph.keys() {
        if !visited.contains(node.as_str()) && has_cycle_dfs(node, graph, &mut visited, &mut rec_stack, &mut path) {
            return Some(path);
        }
    }
    None
}

fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &'a DepGraph,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if !visited.contains(dep.as_str()) {
                if graph.contains_key(dep.as_str()) && has_cycle_dfs(dep, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep.as_str()) {
                path.push(dep.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Dependencies of `root` in execution order (dependencies first, `root` last)
///
/// Callers check for cycles first; a cycle here only stops the walk.
pub(crate) fn closure(root: &str, graph: &DepGraph) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    topo_dfs(root, graph, &mut visited, &mut order);
    order
}

fn topo_dfs<'a>(node: &'a str, graph: &'a DepGraph, visited: &mut HashSet<&'a str>, order: &mut Vec<String>) {
    if !visited.insert(node) {
        return;
    }
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            topo_dfs(dep, graph, visited, order);
        }
    }
    order.push(node.to_string());
}
