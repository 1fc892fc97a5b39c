//! Declarative graph model.
//!
//! A [`Graph`] is an immutable description of worker nodes and the edges
//! that carry context between them. The reserved ids [`INPUT`] and
//! [`OUTPUT`] mark the virtual entry and exit of the graph; they may appear
//! as edge endpoints but are never declared as nodes.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Virtual graph entry.
pub const INPUT: &str = "_input";
/// Virtual graph exit.
pub const OUTPUT: &str = "_output";
/// Placeholder substituted with the run's task in generator prompts.
pub const TASK_PLACEHOLDER: &str = "{{task}}";

/// Whether `id` is one of the reserved sentinel ids.
pub fn is_sentinel(id: &str) -> bool {
    id == INPUT || id == OUTPUT
}

/// How upstream output becomes downstream context along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Most recent upstream output only.
    #[default]
    Replace,
    /// Growing "Completed/Result" history.
    Accumulate,
    /// Labelled blocks from every upstream source (fan-in).
    Aggregate,
    /// No context at all.
    None,
}

impl std::fmt::Display for ContextPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextPolicy::Replace => write!(f, "replace"),
            ContextPolicy::Accumulate => write!(f, "accumulate"),
            ContextPolicy::Aggregate => write!(f, "aggregate"),
            ContextPolicy::None => write!(f, "none"),
        }
    }
}

/// How a dynamic node replays its target over generated sub-tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpandMode {
    Sequential,
    Parallel,
}

impl std::fmt::Display for ExpandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpandMode::Sequential => write!(f, "sequential"),
            ExpandMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Opaque configuration handed unchanged to the worker adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// What the worker is; becomes the "You are:" line of the prompt.
    pub role: String,
    /// Node-specific assignment appended after the task.
    pub instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub full_auto: bool,
}

impl WorkerConfig {
    pub fn with_role(role: &str) -> Self {
        Self {
            role: role.to_string(),
            ..Self::default()
        }
    }
}

/// The generator call a dynamic node makes before expanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorCall {
    /// Prompt template containing [`TASK_PLACEHOLDER`].
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub full_auto: bool,
}

impl GeneratorCall {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            ..Self::default()
        }
    }

    /// Substitute the task into the prompt template.
    pub fn render(&self, task: &str) -> String {
        self.prompt.replace(TASK_PLACEHOLDER, task)
    }
}

/// Payload of a dynamic node.
///
/// Both `generator` and `expand` are required for a valid graph; they are
/// optional here so that a loaded but misconfigured node can be reported by
/// the validator instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicSpec {
    pub generator: Option<GeneratorCall>,
    pub expand: Option<ExpandMode>,
    /// Registry name of the transform; `None` means the default.
    pub transform: Option<String>,
}

/// Type-specific node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Delegates to one worker call.
    Worker(WorkerConfig),
    /// Generates sub-tasks at run time.
    Dynamic(DynamicSpec),
}

/// A unit of work in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
}

impl Node {
    /// Create an ordinary worker node.
    pub fn worker(id: &str, config: WorkerConfig) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Worker(config),
        }
    }

    /// Create a fully configured dynamic node using the default transform.
    pub fn dynamic(id: &str, generator: GeneratorCall, expand: ExpandMode) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Dynamic(DynamicSpec {
                generator: Some(generator),
                expand: Some(expand),
                transform: None,
            }),
        }
    }

    /// Name the transform used by a dynamic node. No effect on worker nodes.
    pub fn with_transform(mut self, name: &str) -> Self {
        if let NodeKind::Dynamic(spec) = &mut self.kind {
            spec.transform = Some(name.to_string());
        }
        self
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, NodeKind::Dynamic(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Worker(_) => "worker",
            NodeKind::Dynamic(_) => "dynamic",
        }
    }
}

/// Directed dependency between two nodes or a node and a sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub policy: ContextPolicy,
}

impl Edge {
    pub fn new(source: &str, target: &str, policy: ContextPolicy) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            policy,
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({})", self.source, self.target, self.policy)
    }
}

/// A named graph of nodes and edges.
///
/// Nodes are keyed by id in a sorted map so that iteration order is stable
/// across runs. Edges keep their declaration order, which is the order
/// every upstream/downstream query reports them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub name: String,
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Add a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Append an edge. References are checked by validation, not here.
    pub fn connect(&mut self, source: &str, target: &str, policy: ContextPolicy) -> &mut Self {
        self.edges.push(Edge::new(source, target, policy));
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Targets of edges leaving [`INPUT`].
    pub fn entry_nodes(&self) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == INPUT)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Sources of edges entering [`OUTPUT`].
    pub fn exit_nodes(&self) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == OUTPUT)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Edges whose target is `id`.
    pub fn upstream(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }

    /// Edges whose source is `id`.
    pub fn downstream(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    /// Build the dependency view over real nodes only.
    ///
    /// Edges touching a sentinel or an undeclared id are left out, so the
    /// view is safe to build before validation.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for id in self.nodes.keys() {
            index.insert(id.clone(), graph.add_node(id.clone()));
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (index.get(&edge.source), index.get(&edge.target)) {
                graph.add_edge(from, to, edge.policy);
            }
        }
        DependencyGraph { graph, index }
    }
}

/// Real-node dependency structure derived from a [`Graph`].
pub struct DependencyGraph {
    graph: DiGraph<String, ContextPolicy>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Direct successors of `id`, one entry per edge, in declaration order.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct predecessors of `id`, one entry per edge, in declaration order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Number of real-node edges entering `id`.
    pub fn in_degree(&self, id: &str) -> usize {
        self.predecessors(id).len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.index.get(id) else {
            return Vec::new();
        };
        // petgraph walks adjacency lists newest-first.
        let mut found: Vec<&str> = self
            .graph
            .neighbors_directed(index, direction)
            .filter_map(|n| self.graph.node_weight(n).map(String::as_str))
            .collect();
        found.reverse();
        found
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
