//! Context building from upstream envelopes.
//!
//! Each [`ContextPolicy`] maps to one builder function. Builders only see
//! completed envelopes with non-empty output; failed upstream work
//! contributes nothing.

use std::collections::{HashMap, HashSet};

use crate::core::envelope::TaskEnvelope;
use crate::core::graph::{ContextPolicy, Graph, INPUT};
use crate::util::truncate_chars;

/// Maximum characters of task text used as an `accumulate` label.
pub const LABEL_CHARS: usize = 80;
/// Separator between `aggregate` blocks.
pub const AGGREGATE_DELIMITER: &str = "\n\n---\n\n";

/// Envelopes produced by one upstream source, as seen through one edge.
#[derive(Debug, Clone, Copy)]
pub struct Upstream<'a> {
    pub source: &'a str,
    pub envelopes: &'a [TaskEnvelope],
}

/// Signature shared by every policy builder.
pub type BuildFn = fn(&[Upstream<'_>]) -> String;

/// Dispatch table from policy to builder.
pub fn builder_for(policy: ContextPolicy) -> BuildFn {
    match policy {
        ContextPolicy::Replace => build_replace,
        ContextPolicy::Accumulate => build_accumulate,
        ContextPolicy::Aggregate => build_aggregate,
        ContextPolicy::None => build_none,
    }
}

/// Compute the context for `node_id` from its inbound edges.
///
/// Inbound edges are taken in declaration order and grouped by policy in
/// order of first appearance; each group is built by its policy's builder
/// and non-empty sections are joined with a blank line. Edges from
/// [`INPUT`] never contribute.
pub fn build_context(
    graph: &Graph,
    node_id: &str,
    completed: &HashMap<String, Vec<TaskEnvelope>>,
) -> String {
    build_context_excluding(graph, node_id, completed, &HashSet::new())
}

/// [`build_context`] with the edges from `excluded` sources left out.
pub fn build_context_excluding(
    graph: &Graph,
    node_id: &str,
    completed: &HashMap<String, Vec<TaskEnvelope>>,
    excluded: &HashSet<&str>,
) -> String {
    let mut sections: Vec<(ContextPolicy, Vec<Upstream<'_>>)> = Vec::new();

    for edge in graph.upstream(node_id) {
        if edge.source == INPUT || excluded.contains(edge.source.as_str()) {
            continue;
        }
        let upstream = Upstream {
            source: &edge.source,
            envelopes: completed.get(&edge.source).map(Vec::as_slice).unwrap_or(&[]),
        };
        match sections.iter_mut().find(|(policy, _)| *policy == edge.policy) {
            Some((_, group)) => group.push(upstream),
            None => sections.push((edge.policy, vec![upstream])),
        }
    }

    sections
        .into_iter()
        .map(|(policy, group)| builder_for(policy)(&group))
        .filter(|section| !section.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `"Completed: <label>\nResult: <output>"`.
pub fn accumulate_entry(label: &str, output: &str) -> String {
    format!("Completed: {}\nResult: {}", label, output)
}

fn successful<'a>(
    upstream: &'a [Upstream<'a>],
) -> impl Iterator<Item = (&'a str, &'a TaskEnvelope, &'a str)> + 'a {
    upstream.iter().flat_map(|u| {
        u.envelopes.iter().filter_map(move |env| match env.output() {
            Some(output) if !output.is_empty() => Some((u.source, env, output)),
            _ => None,
        })
    })
}

fn build_none(_upstream: &[Upstream<'_>]) -> String {
    String::new()
}

fn build_replace(upstream: &[Upstream<'_>]) -> String {
    successful(upstream)
        .last()
        .map(|(_, _, output)| output.to_string())
        .unwrap_or_default()
}

fn build_accumulate(upstream: &[Upstream<'_>]) -> String {
    successful(upstream)
        .map(|(source, env, output)| {
            let label = if env.task.is_empty() {
                source
            } else {
                truncate_chars(&env.task, LABEL_CHARS)
            };
            accumulate_entry(label, output)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_aggregate(upstream: &[Upstream<'_>]) -> String {
    successful(upstream)
        .map(|(source, _, output)| format!("[{}]:\n{}", source, output))
        .collect::<Vec<_>>()
        .join(AGGREGATE_DELIMITER)
}
