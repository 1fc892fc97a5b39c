//! Linear graph integration tests.

use trellis::core::graph::{ContextPolicy, WorkerConfig, INPUT};
use trellis::core::patterns::pipeline;
use trellis::core::TaskState;
use trellis::orchestration::{parallel_groups, topological_order};

use crate::fixtures::{chain, executor, scripted, ScriptedWorker};

/// Given a 3-node replace chain
/// When it runs
/// Then each node sees exactly its predecessor's output
#[tokio::test]
async fn test_chain_replace_context() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(chain(ContextPolicy::Replace), &worker, &generator)
        .run("draft")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.metadata.groups, 3);

    let a = &result.results[0];
    let b = &result.results[1];
    let c = &result.results[2];
    assert_eq!(a.context_given, "");
    assert_eq!(b.context_given, a.output);
    assert_eq!(c.context_given, b.output);
    assert_eq!(result.final_output(), "c(draft)");

    // Every node gets the top-level task, not its predecessor's output.
    assert!(worker.calls().iter().all(|call| call.task == "draft"));
}

#[tokio::test]
async fn test_chain_groups_are_singletons() {
    let graph = chain(ContextPolicy::Replace);
    let order = topological_order(&graph);
    let groups = parallel_groups(&graph, &order);
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(groups, vec![vec!["a"], vec!["b"], vec!["c"]]);

    let (worker, generator) = scripted(ScriptedWorker::new());
    let executor = executor(graph, &worker, &generator);
    assert_eq!(executor.plan().order, order);
    assert_eq!(executor.plan().groups, groups);
}

#[tokio::test]
async fn test_chain_accumulate_uses_task_labels() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(chain(ContextPolicy::Accumulate), &worker, &generator)
        .run("draft")
        .await
        .unwrap();

    // Accumulate across a single edge still labels the entry with the task.
    assert_eq!(
        result.results[1].context_given,
        "Completed: draft\nResult: a(draft)"
    );
}

#[tokio::test]
async fn test_chain_none_policy_gives_empty_context() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(chain(ContextPolicy::None), &worker, &generator)
        .run("draft")
        .await
        .unwrap();
    assert!(result.results.iter().all(|r| r.context_given.is_empty()));
}

#[tokio::test]
async fn test_envelope_lifecycle_and_provenance() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(chain(ContextPolicy::Replace), &worker, &generator)
        .run("draft")
        .await
        .unwrap();

    let input = &result.envelopes[0];
    assert_eq!(input.node_id, INPUT);
    assert_eq!(input.state, TaskState::Completed);

    for env in &result.envelopes[1..] {
        assert_eq!(env.state, TaskState::Completed);
        assert_eq!(env.context_id, result.context_id);
        assert!(env.started_at.is_some());
        assert!(env.completed_at >= env.started_at);
    }
    let a = result.envelopes_for("a").next().unwrap();
    let b = result.envelopes_for("b").next().unwrap();
    assert_eq!(a.parent_task_ids, vec![input.task_id]);
    assert_eq!(b.parent_task_ids, vec![a.task_id]);
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let executor = executor(chain(ContextPolicy::Replace), &worker, &generator);

    let first = executor.run("draft").await.unwrap();
    let second = executor.run("draft").await.unwrap();

    assert_ne!(first.context_id, second.context_id);
    assert_eq!(first.results, second.results);
    assert_eq!(worker.calls().len(), 6);
}

#[tokio::test]
async fn test_pipeline_builder_runs() {
    let graph = pipeline(
        "review",
        &[
            ("researcher", WorkerConfig::with_role("researcher")),
            ("writer", WorkerConfig::with_role("writer")),
            ("reviewer", WorkerConfig::with_role("reviewer")),
        ],
    )
    .unwrap();
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(graph, &worker, &generator)
        .run("explain borrowing")
        .await
        .unwrap();

    let labels: Vec<&str> = result.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["researcher", "writer", "reviewer"]);
    assert_eq!(result.metadata.graph_name, "review");
    assert_eq!(result.final_output(), "reviewer(explain borrowing)");
}

#[tokio::test]
async fn test_run_result_json() {
    let (worker, generator) = scripted(ScriptedWorker::new());
    let result = executor(chain(ContextPolicy::Replace), &worker, &generator)
        .run("draft")
        .await
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["graph_name"], "chain");
    assert_eq!(json["results"].as_array().unwrap().len(), 3);
    assert_eq!(json["results"][2]["context_given"], "b(draft)");
    assert_eq!(json["envelopes"][1]["state"], "completed");
}
