//! Structural validation of a [`Graph`].
//!
//! Checks run in a fixed order and stop at the first failure:
//! unknown references, missing entry/exit, dynamic node configuration,
//! then cycles among real nodes.

use std::collections::HashMap;

use thiserror::Error;

use crate::core::graph::{is_sentinel, Graph, NodeKind};

/// A graph that cannot be executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("edge {from} -> {to} references unknown node {missing:?}")]
    UnknownReference {
        from: String,
        to: String,
        missing: String,
    },

    #[error("graph has no entry nodes (no edges from _input)")]
    NoEntryNodes,

    #[error("graph has no exit nodes (no edges to _output)")]
    NoExitNodes,

    #[error("dynamic node {node:?} requires a generator call")]
    MissingGenerator { node: String },

    #[error("dynamic node {node:?} requires an expand mode (sequential or parallel)")]
    MissingExpandMode { node: String },

    #[error("cycle detected at edge {from} -> {to}")]
    Cycle { from: String, to: String },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

/// Validate `graph`, returning the first structural problem found.
pub fn validate(graph: &Graph) -> Result<(), StructuralError> {
    check_references(graph)?;
    check_entry_exit(graph)?;
    check_dynamic_nodes(graph)?;
    check_cycles(graph)
}

fn check_references(graph: &Graph) -> Result<(), StructuralError> {
    let known = |id: &str| is_sentinel(id) || graph.contains_node(id);
    for edge in graph.edges() {
        for endpoint in [&edge.source, &edge.target] {
            if !known(endpoint.as_str()) {
                return Err(StructuralError::UnknownReference {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_entry_exit(graph: &Graph) -> Result<(), StructuralError> {
    if graph.entry_nodes().is_empty() {
        return Err(StructuralError::NoEntryNodes);
    }
    if graph.exit_nodes().is_empty() {
        return Err(StructuralError::NoExitNodes);
    }
    Ok(())
}

fn check_dynamic_nodes(graph: &Graph) -> Result<(), StructuralError> {
    for node in graph.nodes() {
        if let NodeKind::Dynamic(spec) = &node.kind {
            if spec.generator.is_none() {
                return Err(StructuralError::MissingGenerator {
                    node: node.id.clone(),
                });
            }
            if spec.expand.is_none() {
                return Err(StructuralError::MissingExpandMode {
                    node: node.id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Three-color depth-first search over real nodes.
///
/// Roots are visited entry nodes first (declaration order), then every
/// remaining node by id, so the reported edge is the one closing the cycle
/// as seen from the graph entry.
fn check_cycles(graph: &Graph) -> Result<(), StructuralError> {
    let deps = graph.dependency_graph();
    let mut marks: HashMap<&str, Mark> = graph.node_ids().map(|id| (id, Mark::Unvisited)).collect();

    let roots = graph
        .entry_nodes()
        .into_iter()
        .filter(|id| graph.contains_node(id))
        .chain(graph.node_ids());

    for root in roots {
        if marks.get(root) != Some(&Mark::Unvisited) {
            continue;
        }
        // Iterative DFS: (node, index of next successor to visit).
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::InStack);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let successors = deps.successors(node);
            if let Some(&succ) = successors.get(frame.1) {
                frame.1 += 1;
                match marks.get(succ).copied().unwrap_or(Mark::Done) {
                    Mark::InStack => {
                        return Err(StructuralError::Cycle {
                            from: node.to_string(),
                            to: succ.to_string(),
                        });
                    }
                    Mark::Unvisited => {
                        marks.insert(succ, Mark::InStack);
                        stack.push((succ, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks.insert(node, Mark::Done);
                stack.pop();
            }
        }
    }
    Ok(())
}
