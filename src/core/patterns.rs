//! Builders for the common graph shapes.
//!
//! Every builder validates what it built, so an empty stage list surfaces
//! as an error here rather than when an executor is created.

use crate::core::graph::{
    ContextPolicy, ExpandMode, GeneratorCall, Graph, Node, WorkerConfig, INPUT, OUTPUT,
};
use crate::core::validate::validate;
use crate::error::Result;
use crate::orchestration::transform::DEFAULT_TRANSFORM;

/// Generator prompt used by [`plan_execute`] when none is supplied.
pub const PLAN_PROMPT: &str = "Break the following task into 2-5 concrete subtasks. \
     Return ONLY a JSON array of strings, no other text.\n\nTask: {{task}}";

/// Id of the dynamic node in a plan-execute graph.
pub const PLANNER: &str = "planner";
/// Id of the worker node in a plan-execute graph.
pub const EXECUTOR: &str = "executor";

/// `_input -> s1 -> ... -> sn -> _output` with `replace` edges.
pub fn pipeline(name: &str, stages: &[(&str, WorkerConfig)]) -> Result<Graph> {
    let mut graph = Graph::new(name);
    let mut previous = INPUT;
    for (id, config) in stages {
        graph.add_node(Node::worker(id, config.clone()));
        graph.connect(previous, id, ContextPolicy::Replace);
        previous = *id;
    }
    if !stages.is_empty() {
        graph.connect(previous, OUTPUT, ContextPolicy::Replace);
    }
    validate(&graph)?;
    Ok(graph)
}

/// Every worker reads the input. With a synthesizer, workers feed it
/// through `aggregate` edges and it alone reaches the output; without one,
/// every worker is an exit.
pub fn parallel(
    name: &str,
    workers: &[(&str, WorkerConfig)],
    synthesizer: Option<(&str, WorkerConfig)>,
) -> Result<Graph> {
    let mut graph = Graph::new(name);
    for (id, config) in workers {
        graph
            .add_node(Node::worker(id, config.clone()))
            .connect(INPUT, id, ContextPolicy::Replace);
    }
    match synthesizer {
        Some((synth_id, config)) => {
            graph.add_node(Node::worker(synth_id, config));
            for (id, _) in workers {
                graph.connect(id, synth_id, ContextPolicy::Aggregate);
            }
            graph.connect(synth_id, OUTPUT, ContextPolicy::Replace);
        }
        None => {
            for (id, _) in workers {
                graph.connect(id, OUTPUT, ContextPolicy::Replace);
            }
        }
    }
    validate(&graph)?;
    Ok(graph)
}

/// A dynamic planner that splits the task and an executor replayed
/// sequentially over the subtasks, each step seeing the earlier results.
pub fn plan_execute(
    name: &str,
    executor: WorkerConfig,
    generator: GeneratorCall,
) -> Result<Graph> {
    let mut graph = Graph::new(name);
    graph
        .add_node(
            Node::dynamic(PLANNER, generator, ExpandMode::Sequential)
                .with_transform(DEFAULT_TRANSFORM),
        )
        .add_node(Node::worker(EXECUTOR, executor));
    graph
        .connect(INPUT, PLANNER, ContextPolicy::Replace)
        .connect(PLANNER, EXECUTOR, ContextPolicy::Accumulate)
        .connect(EXECUTOR, OUTPUT, ContextPolicy::Replace);
    validate(&graph)?;
    Ok(graph)
}

/// The default planner call: [`PLAN_PROMPT`] with no backend preference.
pub fn planner_call() -> GeneratorCall {
    GeneratorCall::new(PLAN_PROMPT)
}
