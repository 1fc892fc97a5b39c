//! Graph definition documents.
//!
//! A graph file is a TOML or JSON document:
//!
//! ```toml
//! name = "review"
//!
//! [nodes.writer]
//! role = "technical writer"
//!
//! [nodes.reviewer]
//! role = "strict reviewer"
//! instruction = "list concrete problems"
//!
//! [[edges]]
//! from = "_input"
//! to = "writer"
//!
//! [[edges]]
//! from = "writer"
//! to = "reviewer"
//! context_policy = "replace"
//!
//! [[edges]]
//! from = "reviewer"
//! to = "_output"
//! ```
//!
//! Loading always validates; a [`Graph`] returned from here is ready to run.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::graph::{
    ContextPolicy, DynamicSpec, ExpandMode, GeneratorCall, Graph, Node, NodeKind, WorkerConfig,
};
use crate::core::validate::validate;
use crate::error::{Error, Result};
use crate::tlog_debug;

/// On-disk encoding of a graph document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Toml,
    Json,
}

impl GraphFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(GraphFormat::Toml),
            Some("json") => Ok(GraphFormat::Json),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Node type tag. `agent` is accepted as an older spelling of `worker`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    #[serde(alias = "agent")]
    Worker,
    Dynamic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDocument {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub role: String,
    pub instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub full_auto: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<ExpandMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(alias = "llm_call", skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDocument {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub context_policy: ContextPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default, deserialize_with = "unique_nodes")]
    pub nodes: BTreeMap<String, NodeDocument>,
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
}

fn default_name() -> String {
    "unnamed".to_string()
}

/// Read the `nodes` table, rejecting a node id declared twice.
fn unique_nodes<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, NodeDocument>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NodesVisitor;

    impl<'de> Visitor<'de> for NodesVisitor {
        type Value = BTreeMap<String, NodeDocument>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of node id to node definition")
        }

        fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut nodes = BTreeMap::new();
            while let Some((id, node)) = access.next_entry::<String, NodeDocument>()? {
                if nodes.contains_key(&id) {
                    return Err(de::Error::custom(format!("duplicate node id {:?}", id)));
                }
                nodes.insert(id, node);
            }
            Ok(nodes)
        }
    }

    deserializer.deserialize_map(NodesVisitor)
}

impl GraphDocument {
    /// Build the graph described by this document, without validating it.
    pub fn into_graph(self) -> Graph {
        let mut graph = Graph::new(&self.name);
        for (id, doc) in self.nodes {
            graph.add_node(doc.into_node(&id));
        }
        for edge in &self.edges {
            graph.connect(&edge.from, &edge.to, edge.context_policy);
        }
        graph
    }
}

impl NodeDocument {
    fn into_node(self, id: &str) -> Node {
        let kind = match self.node_type {
            NodeType::Worker => NodeKind::Worker(WorkerConfig {
                role: self.role,
                instruction: self.instruction,
                backend: self.backend,
                model: self.model,
                full_auto: self.full_auto,
            }),
            NodeType::Dynamic => NodeKind::Dynamic(DynamicSpec {
                generator: self.generator,
                expand: self.expand,
                transform: self.transform.filter(|name| !name.is_empty()),
            }),
        };
        Node {
            id: id.to_string(),
            kind,
        }
    }

    fn from_node(node: &Node) -> Self {
        match &node.kind {
            NodeKind::Worker(config) => Self {
                node_type: NodeType::Worker,
                role: config.role.clone(),
                instruction: config.instruction.clone(),
                backend: config.backend.clone(),
                model: config.model.clone(),
                full_auto: config.full_auto,
                ..Self::default()
            },
            NodeKind::Dynamic(spec) => Self {
                node_type: NodeType::Dynamic,
                expand: spec.expand,
                transform: spec.transform.clone(),
                generator: spec.generator.clone(),
                ..Self::default()
            },
        }
    }
}

/// Describe `graph` as a document.
pub fn to_document(graph: &Graph) -> GraphDocument {
    GraphDocument {
        name: graph.name.clone(),
        nodes: graph
            .nodes()
            .map(|node| (node.id.clone(), NodeDocument::from_node(node)))
            .collect(),
        edges: graph
            .edges()
            .iter()
            .map(|edge| EdgeDocument {
                from: edge.source.clone(),
                to: edge.target.clone(),
                context_policy: edge.policy,
            })
            .collect(),
    }
}

/// Parse and validate a graph document.
pub fn parse_graph_str(text: &str, format: GraphFormat) -> Result<Graph> {
    let document: GraphDocument = match format {
        GraphFormat::Toml => toml::from_str(text)?,
        GraphFormat::Json => serde_json::from_str(text)?,
    };
    let graph = document.into_graph();
    validate(&graph)?;
    tlog_debug!(
        "Parsed graph {:?}: {} nodes, {} edges",
        graph.name,
        graph.node_count(),
        graph.edges().len()
    );
    Ok(graph)
}

/// Load and validate a graph file; the format follows the extension.
pub fn load_graph(path: &Path) -> Result<Graph> {
    let format = GraphFormat::from_path(path)?;
    tlog_debug!("load_graph path={} format={:?}", path.display(), format);
    parse_graph_str(&fs::read_to_string(path)?, format)
}

/// Render `graph` in the given format.
pub fn to_string(graph: &Graph, format: GraphFormat) -> Result<String> {
    let document = to_document(graph);
    Ok(match format {
        GraphFormat::Toml => toml::to_string_pretty(&document)?,
        GraphFormat::Json => serde_json::to_string_pretty(&document)?,
    })
}

/// Write `graph` to `path`; the format follows the extension.
pub fn save_graph(graph: &Graph, path: &Path) -> Result<()> {
    let format = GraphFormat::from_path(path)?;
    fs::write(path, to_string(graph, format)?)?;
    tlog_debug!("Graph {:?} saved to {}", graph.name, path.display());
    Ok(())
}
