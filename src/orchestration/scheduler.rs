//! Execution planning for validated graphs.
//!
//! The scheduler turns a graph into a deterministic linear order and a
//! sequence of parallel groups. Both depend only on the graph's structure,
//! so the same graph always yields the same plan.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::graph::{DependencyGraph, Graph};
use crate::tlog_debug;

/// The precomputed plan for one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Every real node, dependencies first.
    pub order: Vec<String>,
    /// Batches of mutually independent nodes, run one batch at a time.
    pub groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Plan a graph. The graph is expected to be validated.
    pub fn for_graph(graph: &Graph) -> Self {
        let order = topological_order(graph);
        let groups = parallel_groups(graph, &order);
        tlog_debug!(
            "ExecutionPlan for {:?}: {} nodes in {} groups",
            graph.name,
            order.len(),
            groups.len()
        );
        Self { order, groups }
    }

    /// 1-based group position of `node_id`, if it is planned at all.
    pub fn group_of(&self, node_id: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.iter().any(|id| id == node_id))
            .map(|i| i + 1)
    }
}

/// Get all real nodes in dependency order.
///
/// Kahn's algorithm over edges between real nodes. Among nodes that are
/// ready at the same time the lexicographically smallest id goes first,
/// which makes the order independent of insertion order. Nodes on a cycle
/// are left out.
pub fn topological_order(graph: &Graph) -> Vec<String> {
    let deps = graph.dependency_graph();
    let mut in_degree: HashMap<&str, usize> = graph
        .node_ids()
        .map(|id| (id, deps.in_degree(id)))
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id.to_string());
        for successor in deps.successors(id) {
            if let Some(degree) = in_degree.get_mut(successor) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(successor));
                }
            }
        }
    }
    order
}

/// Partition `order` into batches that can run concurrently.
///
/// Each batch holds every remaining node whose real-node dependencies are
/// all in earlier batches, sorted by id. If no remaining node is ready the
/// partition stops early; this cannot happen for a validated graph.
///
/// # Arguments
/// * `graph` - The graph `order` was computed from
/// * `order` - Nodes to partition, as returned by [`topological_order`]
pub fn parallel_groups(graph: &Graph, order: &[String]) -> Vec<Vec<String>> {
    let deps = graph.dependency_graph();
    let mut remaining: BTreeSet<&str> = order.iter().map(String::as_str).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    while !remaining.is_empty() {
        let group = ready_nodes(&deps, &remaining, &done);
        if group.is_empty() {
            tlog_debug!(
                "parallel_groups: {} nodes never became ready",
                remaining.len()
            );
            break;
        }
        for &id in &group {
            remaining.remove(id);
            done.insert(id);
        }
        groups.push(group.into_iter().map(str::to_string).collect());
    }
    groups
}

/// Remaining nodes whose predecessors are all done, in id order.
fn ready_nodes<'a>(
    deps: &DependencyGraph,
    remaining: &BTreeSet<&'a str>,
    done: &HashSet<&str>,
) -> Vec<&'a str> {
    remaining
        .iter()
        .copied()
        .filter(|id| deps.predecessors(id).iter().all(|dep| done.contains(dep)))
        .collect()
}
