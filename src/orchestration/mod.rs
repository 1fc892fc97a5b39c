//! Orchestration layer for trellis.
//!
//! This module plans a validated graph, builds each node's context from
//! upstream envelopes, expands dynamic nodes, and drives the worker calls
//! group by group.

pub mod context;
pub mod executor;
pub mod expander;
pub mod scheduler;
pub mod transform;
pub mod worker;

pub use context::{build_context, build_context_excluding};
pub use executor::{GraphExecutor, NodeResult, RunMetadata, RunResult};
pub use expander::{DynamicExpander, Expansion};
pub use scheduler::{parallel_groups, topological_order, ExecutionPlan};
pub use transform::{parse_list, TransformFn, TransformRegistry, DEFAULT_TRANSFORM};
pub use worker::{compose_prompt, CommandWorker, Generator, Worker, WorkerResponse};
