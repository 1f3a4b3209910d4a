use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Action,
    Trigger,
    Method,
    /// Test lambda and connection callables.
    Lambda,
    Http,
    /// Endpoint inserted by an edge before anything described it.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub label: String,
    pub kind: NodeKind,
}

pub type EdgeMeta = BTreeMap<String, String>;

/// Directed edge. Serializes as `[from, to, meta]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub meta: EdgeMeta,
}

impl Serialize for Edge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.from)?;
        tuple.serialize_element(&self.to)?;
        tuple.serialize_element(&self.meta)?;
        tuple.end()
    }
}

/// Call graph: insertion-ordered nodes, de-duplicated edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    nodes: IndexMap<String, GraphNode>,
    edges: IndexSet<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node unless the id is already present; the first
    /// description wins. Returns whether the node was new.
    pub fn add_node(&mut self, id: &str, label: &str, kind: NodeKind) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        self.nodes.insert(
            id.to_string(),
            GraphNode {
                label: label.to_string(),
                kind,
            },
        );
        true
    }

    /// Inserts an edge, creating missing endpoints so that no edge ever
    /// dangles.
    pub fn add_edge(&mut self, from: &str, to: &str, meta: EdgeMeta) -> bool {
        for id in [from, to] {
            self.add_node(id, id, NodeKind::Other);
        }
        self.edges.insert(Edge {
            from: from.to_string(),
            to: to.to_string(),
            meta,
        })
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct successors of every node, in node then edge insertion order.
    pub fn adjacency(&self) -> IndexMap<&str, Vec<&str>> {
        let mut adjacency: IndexMap<&str, Vec<&str>> =
            self.nodes.keys().map(|id| (id.as_str(), Vec::new())).collect();
        for edge in &self.edges {
            if let Some(targets) = adjacency.get_mut(edge.from.as_str())
                && !targets.contains(&edge.to.as_str())
            {
                targets.push(edge.to.as_str());
            }
        }
        adjacency
    }

    /// Edges whose endpoints are not both registered nodes.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| !self.contains(&e.from) || !self.contains(&e.to))
            .collect()
    }
}
