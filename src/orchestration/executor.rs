//! Graph executor.
//!
//! The executor validates a graph once, plans it once, and then runs it any
//! number of times. Each run walks the parallel groups in order, runs the
//! members of a group concurrently, and stops launching new groups after
//! the first failure. Only the orchestrating task writes the completed map;
//! member futures read it and hand their envelopes back at the join point.
//!
//! A dynamic node only calls its generator in its own group. The replay of
//! its target waits for the target's planned group, when every other
//! upstream of the target has finished.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::core::envelope::{ContextId, TaskEnvelope, TaskId};
use crate::core::graph::{Graph, NodeKind, WorkerConfig, INPUT};
use crate::core::validate::validate;
use crate::error::{Error, Result};
use crate::log::StepLog;
use crate::orchestration::context::{build_context, build_context_excluding};
use crate::orchestration::expander::{DynamicExpander, Expansion};
use crate::orchestration::scheduler::ExecutionPlan;
use crate::orchestration::transform::{TransformRegistry, DEFAULT_TRANSFORM};
use crate::orchestration::worker::{invoke_blocking, Generator, Worker};
use crate::{tlog, tlog_debug};

/// What one node produced, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    /// The node id, or `<target>-<i>` for the i-th expanded sub-task.
    pub label: String,
    pub output: String,
    pub error: Option<String>,
    pub context_given: String,
}

impl NodeResult {
    fn from_envelope(label: String, env: &TaskEnvelope) -> Self {
        let (output, error) = match &env.result {
            Some(response) => (response.output.clone(), response.error.clone()),
            None => (String::new(), None),
        };
        Self {
            node_id: env.node_id.clone(),
            label,
            output,
            error,
            context_given: env.context.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub pattern: String,
    pub graph_name: String,
    /// Number of parallel groups in the plan.
    pub groups: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Outcome of one graph run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub context_id: ContextId,
    pub graph_name: String,
    /// Per-node results, group by group, in group order.
    pub results: Vec<NodeResult>,
    /// Every envelope of the run, starting with the virtual input.
    pub envelopes: Vec<TaskEnvelope>,
    pub success: bool,
    /// Planned nodes never started because an earlier group failed.
    pub skipped: Vec<String>,
    pub metadata: RunMetadata,
}

impl RunResult {
    /// Output of the last reported result, or `""` if nothing ran.
    pub fn final_output(&self) -> &str {
        self.results.last().map_or("", |r| r.output.as_str())
    }

    /// `"<label>: <error>"` for every failed result.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.label, e)))
            .collect()
    }

    /// Results attributed to `node_id`.
    pub fn results_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeResult> {
        self.results.iter().filter(move |r| r.node_id == node_id)
    }

    /// Envelopes attributed to `node_id`.
    pub fn envelopes_for<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a TaskEnvelope> {
        self.envelopes.iter().filter(move |e| e.node_id == node_id)
    }
}

/// What one group member handed back to the orchestrator.
enum NodeOutcome {
    Worker(TaskEnvelope),
    /// A dynamic node's generator call, possibly leaving a replay pending.
    Generated(Expansion),
    /// A target node replayed once per pending sub-task.
    Replayed(Vec<TaskEnvelope>),
}

/// Expansions waiting for their target's group, keyed by target id.
type Pending = HashMap<String, Vec<Expansion>>;

/// Runs a validated graph against a worker and a generator.
pub struct GraphExecutor {
    graph: Graph,
    plan: ExecutionPlan,
    worker: Arc<dyn Worker>,
    generator: Arc<dyn Generator>,
    transforms: TransformRegistry,
    default_transform: String,
}

impl GraphExecutor {
    /// Validate and plan `graph`. Structural errors are returned here, so
    /// an executor never exists for an invalid graph.
    pub fn new(
        graph: Graph,
        worker: Arc<dyn Worker>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        validate(&graph)?;
        let plan = ExecutionPlan::for_graph(&graph);
        tlog_debug!(
            "GraphExecutor::new graph={:?} order={:?} groups={:?}",
            graph.name,
            plan.order,
            plan.groups
        );
        Ok(Self {
            graph,
            plan,
            worker,
            generator,
            transforms: TransformRegistry::default(),
            default_transform: DEFAULT_TRANSFORM.to_string(),
        })
    }

    /// Replace the transform registry.
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Transform used by dynamic nodes that do not name one.
    pub fn with_default_transform(mut self, name: &str) -> Self {
        self.default_transform = name.to_string();
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Run the graph for `task`.
    ///
    /// Worker failures end the run early but are reported in the result
    /// with `success == false`. `Err` means the engine itself could not
    /// continue, for example because a dynamic node names an unknown
    /// transform.
    pub async fn run(&self, task: &str) -> Result<RunResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let context_id = ContextId::new();
        let log = StepLog::new(&self.graph.name);
        let expander = DynamicExpander::new(
            &self.graph,
            self.worker.clone(),
            self.generator.clone(),
            &self.transforms,
            &self.default_transform,
            &log,
        );

        log.info(&format!(
            "run {} started: {} nodes in {} groups",
            context_id.short(),
            self.plan.order.len(),
            self.plan.groups.len()
        ));

        let input = TaskEnvelope::input(context_id, task);
        let mut completed: HashMap<String, Vec<TaskEnvelope>> = HashMap::new();
        completed.insert(INPUT.to_string(), vec![input.clone()]);

        let mut reported: Vec<(String, TaskEnvelope)> = Vec::new();
        let mut pending: Pending = HashMap::new();
        let mut reached: HashSet<&str> = HashSet::new();
        let mut failed = false;

        for (index, group) in self.plan.groups.iter().enumerate() {
            if group.len() > 1 {
                log.info(&format!("parallel group {}: {:?}", index + 1, group));
            }
            reached.extend(group.iter().map(String::as_str));

            let runs = group.iter().map(|id| {
                self.execute_node(id, task, context_id, &completed, &pending, &expander, &log)
            });
            let outcomes = join_all(runs)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;

            for (id, outcome) in group.iter().zip(outcomes) {
                match outcome {
                    NodeOutcome::Worker(env) => {
                        failed |= !env.is_completed();
                        reported.push((id.clone(), env.clone()));
                        completed.insert(id.clone(), vec![env]);
                    }
                    NodeOutcome::Generated(expansion) => {
                        failed |= !expansion.succeeded();
                        record_generation(
                            id,
                            expansion,
                            &mut completed,
                            &mut reported,
                            &mut pending,
                        );
                    }
                    NodeOutcome::Replayed(items) => {
                        failed |= !items.iter().all(TaskEnvelope::is_completed);
                        pending.remove(id);
                        for (i, env) in items.iter().enumerate() {
                            reported.push((format!("{}-{}", id, i + 1), env.clone()));
                        }
                        completed.insert(id.clone(), items);
                    }
                }
            }

            if failed {
                log.warn(&format!("stopping after group {}: a node failed", index + 1));
                break;
            }
        }

        let mut envelopes = vec![input];
        envelopes.extend(reported.iter().map(|(_, env)| env.clone()));
        // Only nodes whose group was never launched count as skipped.
        let skipped: Vec<String> = self
            .plan
            .order
            .iter()
            .filter(|id| !reached.contains(id.as_str()))
            .cloned()
            .collect();

        let results: Vec<NodeResult> = reported
            .into_iter()
            .map(|(label, env)| NodeResult::from_envelope(label, &env))
            .collect();

        let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        tlog!(
            "[{}] run {} finished: success={} results={} skipped={:?} elapsed={}ms",
            self.graph.name,
            context_id.short(),
            !failed,
            results.len(),
            skipped,
            elapsed_ms
        );

        Ok(RunResult {
            context_id,
            graph_name: self.graph.name.clone(),
            results,
            envelopes,
            success: !failed,
            skipped,
            metadata: RunMetadata {
                pattern: "graph".to_string(),
                graph_name: self.graph.name.clone(),
                groups: self.plan.groups.len(),
                started_at,
                elapsed_ms,
            },
        })
    }

    /// Run one group member. Reads `completed` and `pending`, never
    /// writes them.
    #[allow(clippy::too_many_arguments)]
    async fn execute_node(
        &self,
        node_id: &str,
        task: &str,
        context_id: ContextId,
        completed: &HashMap<String, Vec<TaskEnvelope>>,
        pending: &Pending,
        expander: &DynamicExpander<'_>,
        log: &StepLog,
    ) -> Result<NodeOutcome> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;

        match &node.kind {
            NodeKind::Dynamic(spec) => {
                let parents = self.parent_ids(node_id, completed, &HashSet::new());
                let expansion = expander
                    .generate(node_id, spec, task, context_id, parents)
                    .await?;
                Ok(NodeOutcome::Generated(expansion))
            }
            NodeKind::Worker(_) if pending.contains_key(node_id) => {
                let expansions = pending.get(node_id).map(Vec::as_slice).unwrap_or(&[]);
                let items = self
                    .replay_target(node_id, expansions, completed, expander)
                    .await?;
                Ok(NodeOutcome::Replayed(items))
            }
            NodeKind::Worker(config) => {
                let parents = self.parent_ids(node_id, completed, &HashSet::new());
                let env = self
                    .run_worker(node_id, config, task, context_id, parents, completed, log)
                    .await?;
                Ok(NodeOutcome::Worker(env))
            }
        }
    }

    /// Replay `node_id` for every expansion that targets it.
    ///
    /// Edges from the owning dynamic nodes carry the sub-tasks; every other
    /// inbound edge contributes the base context and parents as usual. A
    /// failed item stops the remaining expansions.
    async fn replay_target(
        &self,
        node_id: &str,
        expansions: &[Expansion],
        completed: &HashMap<String, Vec<TaskEnvelope>>,
        expander: &DynamicExpander<'_>,
    ) -> Result<Vec<TaskEnvelope>> {
        let owners: HashSet<&str> = expansions
            .iter()
            .map(|e| e.generator.node_id.as_str())
            .collect();
        let base_context = build_context_excluding(&self.graph, node_id, completed, &owners);
        let base_parents = self.parent_ids(node_id, completed, &owners);

        let mut items = Vec::new();
        for expansion in expansions {
            let replayed = expander
                .replay(expansion, &base_context, &base_parents)
                .await?;
            let stop = replayed.iter().any(TaskEnvelope::is_failed);
            items.extend(replayed);
            if stop {
                break;
            }
        }
        Ok(items)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        &self,
        node_id: &str,
        config: &WorkerConfig,
        task: &str,
        context_id: ContextId,
        parents: Vec<TaskId>,
        completed: &HashMap<String, Vec<TaskEnvelope>>,
        log: &StepLog,
    ) -> Result<TaskEnvelope> {
        let context = build_context(&self.graph, node_id, completed);
        let step = self.step_of(node_id);
        let total = self.plan.order.len();

        let mut env = TaskEnvelope::new(context_id, node_id, task, parents)
            .with_context(context.clone());
        env.start()?;
        log.start(step, total, node_id);
        tlog_debug!("node {:?}: context_len={}", node_id, context.len());

        let response = invoke_blocking(
            self.worker.clone(),
            task.to_string(),
            context,
            config.clone(),
        )
        .await;
        env.finish(response)?;

        match env.error() {
            Some(error) => log.error(step, total, node_id, error),
            None => log.done(step, total, node_id, env.output().map_or(0, str::len)),
        }
        Ok(env)
    }

    /// Ids of the envelopes feeding `node_id` from sources not in `skip`,
    /// in edge declaration order.
    fn parent_ids(
        &self,
        node_id: &str,
        completed: &HashMap<String, Vec<TaskEnvelope>>,
        skip: &HashSet<&str>,
    ) -> Vec<TaskId> {
        self.graph
            .upstream(node_id)
            .into_iter()
            .filter(|edge| !skip.contains(edge.source.as_str()))
            .filter_map(|edge| completed.get(&edge.source))
            .flatten()
            .map(|env| env.task_id)
            .collect()
    }

    /// 1-based position of `node_id` in the topological order.
    fn step_of(&self, node_id: &str) -> usize {
        self.plan
            .order
            .iter()
            .position(|id| id == node_id)
            .map_or(0, |i| i + 1)
    }
}

/// Record a generator call and either its emitted items or its pending
/// replay.
fn record_generation(
    node_id: &str,
    expansion: Expansion,
    completed: &mut HashMap<String, Vec<TaskEnvelope>>,
    reported: &mut Vec<(String, TaskEnvelope)>,
    pending: &mut Pending,
) {
    reported.push((node_id.to_string(), expansion.generator.clone()));
    for (i, env) in expansion.items.iter().enumerate() {
        reported.push((expansion.item_label(i), env.clone()));
    }

    let mut own = vec![expansion.generator.clone()];
    own.extend(expansion.items.iter().cloned());
    completed.insert(node_id.to_string(), own);

    if let (true, Some(target)) = (expansion.is_pending(), expansion.target.clone()) {
        pending.entry(target).or_default().push(expansion);
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("graph", &self.graph.name)
            .field("plan", &self.plan)
            .field("transforms", &self.transforms)
            .field("default_transform", &self.default_transform)
            .finish()
    }
}
