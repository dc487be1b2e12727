//! Graph store adapter.
//!
//! The MAT standards knowledge graph is read-only at query time. Two backends:
//! an in-memory store loaded from `graph.json` and a Neo4j store spoken to
//! over its HTTP transactional endpoint. [`GraphStore`] dispatches between
//! them without trait objects.

pub mod memory;
pub mod neo4j;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GraphConfig;
use crate::model::{FactCandidate, GraphQuery, RelationKind};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown graph backend: {0}")]
    UnknownBackend(String),
    #[error("failed to load graph: {0}")]
    Load(String),
    #[error("graph request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Standard,
    Criterion,
    Organization,
    Location,
    Concept,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub text: String,
    /// Source document link, if any.
    #[serde(default)]
    pub url: Option<String>,
}

impl GraphNode {
    /// Text used for ranking and in the prompt context.
    pub fn fact_text(&self) -> String {
        if self.text.is_empty() {
            self.label.clone()
        } else {
            format!("{}: {}", self.label, self.text)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relation: RelationKind,
    #[serde(default = "default_edge_weight")]
    pub weight: f32,
    /// Optional statement carried by the edge itself. Edges with text become
    /// facts of their own during traversal.
    #[serde(default)]
    pub text: Option<String>,
}

fn default_edge_weight() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    pub fn from_json_str(json: &str) -> Result<Self, GraphError> {
        let graph: KnowledgeGraph =
            serde_json::from_str(json).map_err(|e| GraphError::Load(e.to_string()))?;
        graph.check()?;
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Load(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Every edge must reference known nodes; ids must be unique.
    fn check(&self) -> Result<(), GraphError> {
        let mut ids = std::collections::HashSet::new();
        for n in &self.nodes {
            if !ids.insert(n.id.as_str()) {
                return Err(GraphError::Load(format!("duplicate node id '{}'", n.id)));
            }
        }
        for e in &self.edges {
            for end in [&e.from, &e.to] {
                if !ids.contains(end.as_str()) {
                    return Err(GraphError::Load(format!(
                        "edge {} -{}-> {} references unknown node '{end}'",
                        e.from, e.relation, e.to
                    )));
                }
            }
            if !(e.weight > 0.0 && e.weight <= 1.0) {
                return Err(GraphError::Load(format!(
                    "edge {} -{}-> {} has weight {} outside (0, 1]",
                    e.from, e.relation, e.to, e.weight
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum GraphStore {
    Memory(memory::InMemoryGraphStore),
    Neo4j(neo4j::Neo4jStore),
}

impl GraphStore {
    /// Run one traversal. Results are capped at `query.result_cap`.
    pub async fn traverse(&self, query: &GraphQuery) -> Result<Vec<FactCandidate>, GraphError> {
        match self {
            GraphStore::Memory(s) => s.traverse(query).await,
            GraphStore::Neo4j(s) => s.traverse(query).await,
        }
    }

    /// `(node_id, label)` for every node, ordered by id.
    pub async fn node_labels(&self) -> Result<Vec<(String, String)>, GraphError> {
        match self {
            GraphStore::Memory(s) => Ok(s.node_labels()),
            GraphStore::Neo4j(s) => s.node_labels().await,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            GraphStore::Memory(_) => "memory",
            GraphStore::Neo4j(_) => "neo4j",
        }
    }
}

/// Construct a `GraphStore` from config. `password` comes from `NEO4J_PASSWORD`.
pub fn build(config: &GraphConfig, password: Option<String>) -> Result<GraphStore, GraphError> {
    match config.backend.as_str() {
        "memory" => {
            let graph = KnowledgeGraph::load(&config.path)?;
            Ok(GraphStore::Memory(memory::InMemoryGraphStore::new(graph)))
        }
        "neo4j" => {
            let n = &config.neo4j;
            let store = neo4j::Neo4jStore::new(&n.url, &n.database, n.user.clone(), password)?;
            Ok(GraphStore::Neo4j(store))
        }
        other => Err(GraphError::UnknownBackend(other.to_string())),
    }
}
