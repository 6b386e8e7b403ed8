//! Workflow templates: reusable graphs of nodes and "must finish before" edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::errors::Result;
use crate::ids::{ActorId, TaskTypeId, TemplateId};

/// Descriptive extras carried by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub description: String,
    pub estimated_duration_hours: f64,
}

/// A template-scoped unit of work, not yet a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub task_type_id: TaskTypeId,
    pub label: String,
    #[serde(default)]
    pub metadata: Option<NodeMetadata>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, task_type_id: TaskTypeId, label: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            task_type_id,
            label: label.into(),
            metadata: None,
        }
    }
}

/// `from_node_id` must finish before `to_node_id` can start
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from_node_id: String,
    pub to_node_id: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node_id: from.into(),
            to_node_id: to.into(),
        }
    }
}

/// The node/edge payload of a template, as submitted by an author
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateGraph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl TemplateGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Number of incoming edges per node id. Edges naming unknown nodes are
    /// ignored; the validator rejects those graphs before this matters.
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|node| (node.node_id.as_str(), 0))
            .collect();
        for edge in &self.edges {
            if let Some(count) = degrees.get_mut(edge.to_node_id.as_str()) {
                *count += 1;
            }
        }
        degrees
    }
}

/// A stored template. Saving over an existing id overwrites it and bumps
/// `revision`; instances remember the revision they were built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub author: ActorId,
    pub graph: TemplateGraph,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateRecord {
    pub fn new(name: impl Into<String>, author: ActorId, graph: TemplateGraph) -> Self {
        let now = Utc::now();
        Self {
            id: TemplateId::generate(),
            name: name.into(),
            author,
            graph,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite name and graph in place, keeping identity and creation time.
    pub fn overwrite(&self, name: impl Into<String>, author: ActorId, graph: TemplateGraph) -> Self {
        Self {
            id: self.id,
            name: name.into(),
            author,
            graph,
            revision: self.revision + 1,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}
