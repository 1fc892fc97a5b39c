//! Core domain model for trellis.
//!
//! This module contains the declarative graph, its validation, the task
//! envelopes that flow along edges, and the document format graphs are
//! loaded from.

pub mod envelope;
pub mod graph;
pub mod loader;
pub mod patterns;
pub mod validate;

pub use envelope::{ContextId, TaskEnvelope, TaskId, TaskState};
pub use graph::{
    ContextPolicy, DynamicSpec, Edge, ExpandMode, GeneratorCall, Graph, Node, NodeKind,
    WorkerConfig, INPUT, OUTPUT,
};
pub use loader::{load_graph, parse_graph_str, GraphFormat};
pub use validate::{validate, StructuralError};
