//! Dynamic node integration tests.
//!
//! A scripted generator returns a fixed list; the executor node downstream
//! of the planner is replayed once per item.

use std::sync::Arc;
use std::time::Duration;

use trellis::core::graph::{
    ContextPolicy, ExpandMode, GeneratorCall, Graph, Node, WorkerConfig, INPUT, OUTPUT,
};
use trellis::core::patterns::{plan_execute, planner_call, EXECUTOR, PLANNER};
use trellis::orchestration::{GraphExecutor, TransformRegistry};
use trellis::Error;

use crate::fixtures::{executor, plan_graph, worker, ScriptedGenerator, ScriptedWorker};

const TWO_STEPS: &str = r#"["step1","step2"]"#;

fn scripted_pair(
    worker: ScriptedWorker,
    generator: ScriptedGenerator,
) -> (Arc<ScriptedWorker>, Arc<ScriptedGenerator>) {
    (Arc::new(worker), Arc::new(generator))
}

/// Given a sequential planner feeding an accumulate edge
/// When the generator returns two steps
/// Then the second step sees the first step's result
#[tokio::test]
async fn test_sequential_accumulate() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    let result = executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();

    assert!(result.success);
    let labels: Vec<&str> = result.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["planner", "executor-1", "executor-2"]);

    let calls = worker.calls_for("executor");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].task, "step1");
    assert_eq!(calls[0].context, "");
    assert_eq!(calls[1].task, "step2");
    assert_eq!(
        calls[1].context,
        "Completed: step1\nResult: executor(step1)"
    );
    assert_eq!(result.final_output(), "executor(step2)");
}

#[tokio::test]
async fn test_sequential_replace_sees_previous_only() {
    let (worker, generator) = scripted_pair(
        ScriptedWorker::new(),
        ScriptedGenerator::returning(r#"["one","two","three"]"#),
    );
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Replace);
    executor(graph, &worker, &generator).run("go").await.unwrap();

    let contexts: Vec<String> = worker
        .calls_for("executor")
        .into_iter()
        .map(|c| c.context)
        .collect();
    assert_eq!(contexts, vec!["", "executor(one)", "executor(two)"]);
}

#[tokio::test]
async fn test_parallel_items_share_no_context() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let graph = plan_graph(ExpandMode::Parallel, ContextPolicy::Accumulate);
    let result = executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();

    assert!(result.success);
    let calls = worker.calls_for("executor");
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.context.is_empty()));

    let outputs: Vec<&str> = result.results[1..]
        .iter()
        .map(|r| r.output.as_str())
        .collect();
    assert_eq!(outputs, vec!["executor(step1)", "executor(step2)"]);
}

#[tokio::test]
async fn test_item_provenance() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    let result = executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();

    let planner = result.envelopes_for("planner").next().unwrap();
    let items: Vec<_> = result.envelopes_for("executor").collect();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].parent_task_ids, vec![planner.task_id]);
    assert_eq!(
        items[1].parent_task_ids,
        vec![planner.task_id, items[0].task_id]
    );
}

#[tokio::test]
async fn test_expanded_target_is_not_rerun() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    let executor = executor(graph, &worker, &generator);
    assert_eq!(executor.plan().groups, vec![vec!["planner"], vec!["executor"]]);

    let result = executor.run("build it").await.unwrap();
    assert_eq!(worker.calls_for("executor").len(), 2);
    assert!(result.skipped.is_empty());
}

#[tokio::test]
async fn test_downstream_of_target_sees_every_item() {
    let mut graph = Graph::new("plan-review");
    graph
        .add_node(Node::dynamic(
            "planner",
            GeneratorCall::new("Split: {{task}}"),
            ExpandMode::Parallel,
        ))
        .add_node(worker("executor"))
        .add_node(worker("reviewer"));
    graph
        .connect(INPUT, "planner", ContextPolicy::Replace)
        .connect("planner", "executor", ContextPolicy::Replace)
        .connect("executor", "reviewer", ContextPolicy::Aggregate)
        .connect("reviewer", OUTPUT, ContextPolicy::Replace);

    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let result = executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();

    let reviewer = worker.calls_for("reviewer");
    assert_eq!(reviewer.len(), 1);
    assert_eq!(reviewer[0].task, "build it");
    assert_eq!(
        reviewer[0].context,
        "[executor]:\nexecutor(step1)\n\n---\n\n[executor]:\nexecutor(step2)"
    );
    assert_eq!(result.final_output(), "reviewer(build it)");
}

#[tokio::test]
async fn test_dynamic_without_downstream_emits_items() {
    let mut graph = Graph::new("split-only");
    graph.add_node(Node::dynamic(
        "splitter",
        GeneratorCall::new("{{task}}"),
        ExpandMode::Sequential,
    ));
    graph
        .connect(INPUT, "splitter", ContextPolicy::Replace)
        .connect("splitter", OUTPUT, ContextPolicy::Replace);

    let (worker, generator) = scripted_pair(
        ScriptedWorker::new(),
        ScriptedGenerator::returning("- first\n- second"),
    );
    let result = executor(graph, &worker, &generator)
        .run("split")
        .await
        .unwrap();

    assert!(result.success);
    assert!(worker.calls().is_empty());
    let labels: Vec<&str> = result.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["splitter", "splitter-1", "splitter-2"]);
    assert_eq!(result.final_output(), "second");
}

/// Given a planner whose generator returns no steps
/// When the run finishes
/// Then the executor is never called but is not reported as skipped
#[tokio::test]
async fn test_empty_expansion_is_not_skipped() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning("[]"));
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    let result = executor(graph, &worker, &generator)
        .run("nothing to do")
        .await
        .unwrap();

    assert!(result.success);
    assert!(worker.calls().is_empty());
    assert!(result.skipped.is_empty());
    assert!(result.results_for("executor").next().is_none());
}

#[tokio::test]
async fn test_prompt_rendered_with_task() {
    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();
    assert_eq!(generator.prompts(), vec!["Split into steps: build it"]);
}

#[tokio::test]
async fn test_unknown_transform_is_an_error() {
    let mut graph = Graph::new("bad-transform");
    graph
        .add_node(
            Node::dynamic("planner", GeneratorCall::new("{{task}}"), ExpandMode::Sequential)
                .with_transform("split_csv"),
        )
        .add_node(worker("executor"));
    graph
        .connect(INPUT, "planner", ContextPolicy::Replace)
        .connect("planner", "executor", ContextPolicy::Replace)
        .connect("executor", OUTPUT, ContextPolicy::Replace);

    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let err = executor(graph, &worker, &generator)
        .run("go")
        .await
        .unwrap_err();

    match err {
        Error::UnknownTransform { name, available } => {
            assert_eq!(name, "split_csv");
            assert_eq!(available, "parse_list");
        }
        other => panic!("Expected UnknownTransform, got {:?}", other),
    }
    assert!(generator.prompts().is_empty());
    assert!(worker.calls().is_empty());
}

#[tokio::test]
async fn test_custom_transform() {
    let mut graph = Graph::new("csv");
    graph
        .add_node(
            Node::dynamic("planner", GeneratorCall::new("{{task}}"), ExpandMode::Parallel)
                .with_transform("split_csv"),
        )
        .add_node(worker("executor"));
    graph
        .connect(INPUT, "planner", ContextPolicy::Replace)
        .connect("planner", "executor", ContextPolicy::Replace)
        .connect("executor", OUTPUT, ContextPolicy::Replace);

    let mut transforms = TransformRegistry::default();
    transforms.register("split_csv", |text: &str| {
        text.split(',').map(|s| s.trim().to_string()).collect()
    });

    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning("x, y, z"));
    let result = GraphExecutor::new(graph, worker.clone(), generator.clone())
        .unwrap()
        .with_transforms(transforms)
        .run("go")
        .await
        .unwrap();

    let tasks: Vec<String> = worker.calls().into_iter().map(|c| c.task).collect();
    let mut sorted = tasks.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["x", "y", "z"]);
    assert_eq!(result.results.len(), 4);
    assert_eq!(result.results[3].label, "executor-3");
}

#[tokio::test]
async fn test_default_transform_override() {
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Replace);
    let mut transforms = TransformRegistry::default();
    transforms.register("whole", |text: &str| vec![text.to_string()]);

    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    GraphExecutor::new(graph, worker.clone(), generator.clone())
        .unwrap()
        .with_transforms(transforms)
        .with_default_transform("whole")
        .run("go")
        .await
        .unwrap();

    let calls = worker.calls_for("executor");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].task, TWO_STEPS);
}

#[tokio::test]
async fn test_generator_failure_halts_run() {
    let (worker, generator) = scripted_pair(
        ScriptedWorker::new(),
        ScriptedGenerator::failing("rate limited"),
    );
    let graph = plan_graph(ExpandMode::Sequential, ContextPolicy::Accumulate);
    let result = executor(graph, &worker, &generator)
        .run("build it")
        .await
        .unwrap();

    assert!(!result.success);
    assert!(worker.calls().is_empty());
    assert_eq!(result.results.len(), 1);
    assert_eq!(result.errors(), vec!["planner: rate limited"]);
    assert_eq!(result.skipped, vec!["executor"]);
}

#[tokio::test]
async fn test_dynamic_node_shares_group_with_worker() {
    let mut graph = Graph::new("mixed");
    graph
        .add_node(Node::dynamic(
            "planner",
            GeneratorCall::new("{{task}}"),
            ExpandMode::Sequential,
        ))
        .add_node(worker("executor"))
        .add_node(worker("side"));
    graph
        .connect(INPUT, "planner", ContextPolicy::Replace)
        .connect(INPUT, "side", ContextPolicy::Replace)
        .connect("planner", "executor", ContextPolicy::Accumulate)
        .connect("executor", OUTPUT, ContextPolicy::Replace)
        .connect("side", OUTPUT, ContextPolicy::Replace);

    let (worker, generator) =
        scripted_pair(ScriptedWorker::new(), ScriptedGenerator::returning(TWO_STEPS));
    let executor = executor(graph, &worker, &generator);
    assert_eq!(
        executor.plan().groups,
        vec![vec!["planner", "side"], vec!["executor"]]
    );

    let result = executor.run("go").await.unwrap();
    assert!(result.success);
    let labels: Vec<&str> = result.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["planner", "side", "executor-1", "executor-2"]);
    assert_eq!(worker.calls_for("side").len(), 1);
    assert_eq!(worker.calls_for("executor").len(), 2);
}

/// Planner and a two-step worker branch both feed the executor.
fn planner_with_side_branch() -> Graph {
    let mut graph = Graph::new("side-branch");
    graph
        .add_node(Node::dynamic(
            "planner",
            GeneratorCall::new("{{task}}"),
            ExpandMode::Sequential,
        ))
        .add_node(worker("a"))
        .add_node(worker("side"))
        .add_node(worker("executor"));
    graph
        .connect(INPUT, "planner", ContextPolicy::Replace)
        .connect(INPUT, "a", ContextPolicy::Replace)
        .connect("a", "side", ContextPolicy::Replace)
        .connect("side", "executor", ContextPolicy::Replace)
        .connect("planner", "executor", ContextPolicy::Accumulate)
        .connect("executor", OUTPUT, ContextPolicy::Replace);
    graph
}

/// Given a target that also depends on a slower worker branch
/// When the planner finishes first
/// Then the target only runs after that branch, and sees its output
#[tokio::test]
async fn test_target_waits_for_its_other_upstreams() {
    let (worker, generator) = scripted_pair(
        ScriptedWorker::new().slow("side", Duration::from_millis(50)),
        ScriptedGenerator::returning(TWO_STEPS),
    );
    let executor = executor(planner_with_side_branch(), &worker, &generator);
    assert_eq!(
        executor.plan().groups,
        vec![vec!["a", "planner"], vec!["side"], vec!["executor"]]
    );

    let result = executor.run("go").await.unwrap();
    assert!(result.success);

    let roles: Vec<String> = worker.calls().into_iter().map(|c| c.role).collect();
    assert_eq!(roles, vec!["a", "side", "executor", "executor"]);

    let calls = worker.calls_for("executor");
    assert_eq!(calls[0].task, "step1");
    assert_eq!(calls[0].context, "side(go)");
    assert_eq!(
        calls[1].context,
        "side(go)\n\nCompleted: step1\nResult: executor(step1)"
    );

    let labels: Vec<&str> = result.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["a", "planner", "side", "executor-1", "executor-2"]);
    assert!(result.skipped.is_empty());
}

/// Given a target that also depends on a worker branch
/// When that branch fails
/// Then the target is never called and is reported as skipped
#[tokio::test]
async fn test_target_not_called_when_other_upstream_fails() {
    let (worker, generator) = scripted_pair(
        ScriptedWorker::new().failing("side", "side broke"),
        ScriptedGenerator::returning(TWO_STEPS),
    );
    let result = executor(planner_with_side_branch(), &worker, &generator)
        .run("go")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(generator.prompts().len(), 1);
    assert!(worker.calls_for("executor").is_empty());
    assert_eq!(result.errors(), vec!["side: side broke"]);
    assert_eq!(result.skipped, vec!["executor"]);
    assert!(result.envelopes_for("executor").next().is_none());
}

#[tokio::test]
async fn test_plan_execute_builder_runs() {
    let graph = plan_execute("plan", WorkerConfig::with_role("engineer"), planner_call()).unwrap();
    let (worker, generator) = scripted_pair(
        ScriptedWorker::new(),
        ScriptedGenerator::returning("Sure!\n[\"design\", \"implement\"]"),
    );
    let result = executor(graph, &worker, &generator)
        .run("a todo app")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.results[0].node_id, PLANNER);
    assert!(generator.prompts()[0].ends_with("Task: a todo app"));

    let calls = worker.calls_for("engineer");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].context, "Completed: design\nResult: engineer(design)");
    assert_eq!(result.results[2].label, format!("{}-2", EXECUTOR));
}
