//! Dynamic node expansion.
//!
//! Expansion happens in two steps. [`DynamicExpander::generate`] runs in
//! the dynamic node's own group: it calls the generator and turns the raw
//! text into sub-tasks. [`DynamicExpander::replay`] runs later, in the
//! target's planned group, once every other dependency of the target has
//! finished; it invokes the target once per sub-task, either one after
//! another or all at once.

use std::sync::Arc;

use futures::future::join_all;

use crate::core::envelope::{ContextId, TaskEnvelope, TaskId};
use crate::core::graph::{
    ContextPolicy, DynamicSpec, ExpandMode, Graph, NodeKind, WorkerConfig, OUTPUT,
};
use crate::core::validate::StructuralError;
use crate::error::{Error, Result};
use crate::log::StepLog;
use crate::orchestration::context::{builder_for, Upstream};
use crate::orchestration::transform::TransformRegistry;
use crate::orchestration::worker::{generate_blocking, invoke_blocking, Generator, Worker};
use crate::util::truncate_chars;
use crate::{tlog_debug, tlog_trace};

/// Outcome of one dynamic node's generator call.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// The generator call, recorded under the dynamic node's own id.
    pub generator: TaskEnvelope,
    /// Node replayed per sub-task, if the dynamic node has one.
    pub target: Option<String>,
    pub mode: ExpandMode,
    /// Sub-tasks produced by the transform, in generated order.
    pub subtasks: Vec<String>,
    /// Emitted envelopes of a dynamic node without a target. Empty while a
    /// target replay is still pending.
    pub items: Vec<TaskEnvelope>,
}

impl Expansion {
    pub fn succeeded(&self) -> bool {
        self.generator.is_completed() && self.items.iter().all(TaskEnvelope::is_completed)
    }

    /// Whether sub-tasks are waiting for the target's group.
    pub fn is_pending(&self) -> bool {
        self.target.is_some() && self.generator.is_completed()
    }

    /// Node id the item envelopes are attributed to.
    pub fn owner(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.generator.node_id)
    }

    /// Result label of the `index`-th item: `<owner>-<index + 1>`.
    pub fn item_label(&self, index: usize) -> String {
        format!("{}-{}", self.owner(), index + 1)
    }
}

/// The worker node a dynamic node expands into.
struct Target<'g> {
    id: &'g str,
    policy: ContextPolicy,
    config: &'g WorkerConfig,
}

/// Runs dynamic nodes for one graph run.
pub struct DynamicExpander<'a> {
    graph: &'a Graph,
    worker: Arc<dyn Worker>,
    generator: Arc<dyn Generator>,
    transforms: &'a TransformRegistry,
    default_transform: &'a str,
    log: &'a StepLog,
}

impl<'a> DynamicExpander<'a> {
    pub fn new(
        graph: &'a Graph,
        worker: Arc<dyn Worker>,
        generator: Arc<dyn Generator>,
        transforms: &'a TransformRegistry,
        default_transform: &'a str,
        log: &'a StepLog,
    ) -> Self {
        Self {
            graph,
            worker,
            generator,
            transforms,
            default_transform,
            log,
        }
    }

    /// The node `node_id` would expand into, if any.
    ///
    /// This is the first downstream edge, in declaration order, that does
    /// not lead to [`OUTPUT`]. When that node is itself dynamic there is no
    /// target: sub-tasks are emitted directly and the dynamic downstream
    /// node runs on its own.
    pub fn target_of(&self, node_id: &str) -> Option<&'a str> {
        self.target(node_id).map(|t| t.id)
    }

    fn target(&self, node_id: &str) -> Option<Target<'a>> {
        let graph: &'a Graph = self.graph;
        let edge = graph
            .downstream(node_id)
            .into_iter()
            .find(|e| e.target != OUTPUT)?;
        match &graph.node(&edge.target)?.kind {
            NodeKind::Worker(config) => Some(Target {
                id: edge.target.as_str(),
                policy: edge.policy,
                config,
            }),
            NodeKind::Dynamic(_) => None,
        }
    }

    /// Call the generator of `node_id` for the run's top-level `task`.
    ///
    /// Without a target the sub-tasks are emitted as completed items right
    /// away; with one they are left in [`Expansion::subtasks`] for
    /// [`replay`](Self::replay). Generator failures are reported through
    /// the generator envelope. `Err` is reserved for problems that stop the
    /// engine: an unknown transform, a misconfigured node, or a lifecycle
    /// violation.
    pub async fn generate(
        &self,
        node_id: &str,
        spec: &DynamicSpec,
        task: &str,
        context_id: ContextId,
        parents: Vec<TaskId>,
    ) -> Result<Expansion> {
        let call = spec.generator.as_ref().ok_or(StructuralError::MissingGenerator {
            node: node_id.to_string(),
        })?;
        let mode = spec.expand.ok_or(StructuralError::MissingExpandMode {
            node: node_id.to_string(),
        })?;
        let transform_name = spec.transform.as_deref().unwrap_or(self.default_transform);
        let transform = self.transforms.get(transform_name)?;

        let prompt = call.render(task);
        tlog_trace!("dynamic node {:?} prompt: {}", node_id, prompt);
        self.log
            .info(&format!("dynamic node {:?}: calling generator...", node_id));

        let mut generator = TaskEnvelope::new(context_id, node_id, task, parents);
        generator.start()?;
        let response = generate_blocking(self.generator.clone(), prompt, call.clone()).await;
        generator.finish(response)?;

        let mut expansion = Expansion {
            generator,
            target: self.target_of(node_id).map(str::to_string),
            mode,
            subtasks: Vec::new(),
            items: Vec::new(),
        };

        if let Some(error) = expansion.generator.error() {
            self.log
                .warn(&format!("dynamic node {:?}: generator failed: {}", node_id, error));
            return Ok(expansion);
        }

        expansion.subtasks = transform(expansion.generator.output().unwrap_or_default());
        self.log.info(&format!(
            "dynamic node {:?}: expanded to {} items",
            node_id,
            expansion.subtasks.len()
        ));

        if expansion.target.is_none() {
            expansion.items = self.emit_items(
                node_id,
                &expansion.subtasks,
                context_id,
                expansion.generator.task_id,
            )?;
        }
        Ok(expansion)
    }

    /// Invoke the target of `expansion` once per sub-task.
    ///
    /// `base_context` and `base_parents` come from the target's other
    /// upstream edges, which have all finished by the time the target's
    /// group runs. Sequential items add their own iteration scope to the
    /// base context; parallel items get the base context alone.
    pub async fn replay(
        &self,
        expansion: &Expansion,
        base_context: &str,
        base_parents: &[TaskId],
    ) -> Result<Vec<TaskEnvelope>> {
        let owner = expansion.generator.node_id.as_str();
        let target = self
            .target(owner)
            .ok_or_else(|| Error::NodeNotFound(expansion.owner().to_string()))?;
        let mut parents = vec![expansion.generator.task_id];
        parents.extend_from_slice(base_parents);
        let replay = Replay {
            target: &target,
            items: &expansion.subtasks,
            context_id: expansion.generator.context_id,
            base_context,
            parents: &parents,
        };

        match expansion.mode {
            ExpandMode::Sequential => self.run_sequential(&replay).await,
            ExpandMode::Parallel => self.run_parallel(&replay).await,
        }
    }

    /// Wrap each sub-task as a completed envelope of the dynamic node.
    fn emit_items(
        &self,
        node_id: &str,
        items: &[String],
        context_id: ContextId,
        origin: TaskId,
    ) -> Result<Vec<TaskEnvelope>> {
        items
            .iter()
            .map(|item| -> Result<TaskEnvelope> {
                let mut env = TaskEnvelope::new(context_id, node_id, item, vec![origin]);
                env.start()?;
                env.complete(item)?;
                Ok(env)
            })
            .collect()
    }

    async fn run_sequential(&self, replay: &Replay<'_, 'a>) -> Result<Vec<TaskEnvelope>> {
        let target = replay.target;
        let total = replay.items.len();
        let mut envelopes: Vec<TaskEnvelope> = Vec::with_capacity(total);

        for (i, item) in replay.items.iter().enumerate() {
            // Accumulate sees every prior iteration, the other policies only
            // the one just before.
            let scope: &[TaskEnvelope] = match target.policy {
                ContextPolicy::Accumulate => &envelopes,
                ContextPolicy::None => &[],
                _ => match envelopes.len() {
                    0 => &[],
                    n => &envelopes[n - 1..],
                },
            };
            let section = builder_for(target.policy)(&[Upstream {
                source: target.id,
                envelopes: scope,
            }]);
            let context = join_sections(replay.base_context, &section);
            let mut parents = replay.parents.to_vec();
            parents.extend(scope.iter().map(|env| env.task_id));

            let label = format!("{} ({})", target.id, truncate_chars(item, 50));
            self.log.start(i + 1, total, &label);
            tlog_debug!(
                "expansion {}-{}: context_len={}",
                target.id,
                i + 1,
                context.len()
            );

            let mut env = TaskEnvelope::new(replay.context_id, target.id, item, parents)
                .with_context(context.clone());
            env.start()?;
            let response = invoke_blocking(
                self.worker.clone(),
                item.clone(),
                context,
                target.config.clone(),
            )
            .await;
            env.finish(response)?;

            if let Some(error) = env.error() {
                self.log.error(i + 1, total, target.id, error);
                envelopes.push(env);
                break;
            }
            self.log
                .done(i + 1, total, target.id, env.output().map_or(0, str::len));
            envelopes.push(env);
        }
        Ok(envelopes)
    }

    async fn run_parallel(&self, replay: &Replay<'_, 'a>) -> Result<Vec<TaskEnvelope>> {
        let target = replay.target;
        let total = replay.items.len();
        let runs = replay.items.iter().enumerate().map(|(i, item)| async move {
            let mut env = TaskEnvelope::new(
                replay.context_id,
                target.id,
                item,
                replay.parents.to_vec(),
            )
            .with_context(replay.base_context.to_string());
            env.start()?;
            self.log.start(i + 1, total, target.id);
            let response = invoke_blocking(
                self.worker.clone(),
                item.clone(),
                replay.base_context.to_string(),
                target.config.clone(),
            )
            .await;
            env.finish(response)?;
            match env.error() {
                Some(error) => self.log.error(i + 1, total, target.id, error),
                None => self
                    .log
                    .done(i + 1, total, target.id, env.output().map_or(0, str::len)),
            }
            Ok::<TaskEnvelope, Error>(env)
        });
        join_all(runs).await.into_iter().collect()
    }
}

/// Everything one replay needs, borrowed for its duration.
struct Replay<'r, 'g> {
    target: &'r Target<'g>,
    items: &'r [String],
    context_id: ContextId,
    base_context: &'r str,
    parents: &'r [TaskId],
}

/// Join two context sections with a blank line, dropping empty ones.
fn join_sections(base: &str, section: &str) -> String {
    match (base.is_empty(), section.is_empty()) {
        (true, _) => section.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}\n\n{}", base, section),
    }
}
