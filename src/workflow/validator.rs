//! Structural checks a workflow graph must pass before it is trusted.
//!
//! Checks run in a fixed order and stop at the first failure: duplicate node
//! ids, dangling edge endpoints, unresolvable task types, then cycles.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::core::errors::{Result, ValidationFailure};
use crate::ids::TaskTypeId;
use crate::workflow::template::TemplateGraph;

/// Resolves task-type references against the task-type registry
#[async_trait]
pub trait TaskTypeLookup: Send + Sync {
    /// May be served from a cache
    async fn task_type_exists(&self, id: TaskTypeId) -> Result<bool>;

    /// Authoritative read, never cached
    async fn task_type_exists_fresh(&self, id: TaskTypeId) -> Result<bool>;
}

/// A graph that passed every validator check.
///
/// Only [`TemplateValidator`] can build one, so holding a `ValidatedGraph`
/// is proof the checks ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedGraph {
    graph: TemplateGraph,
}

impl ValidatedGraph {
    pub fn graph(&self) -> &TemplateGraph {
        &self.graph
    }

    pub fn into_inner(self) -> TemplateGraph {
        self.graph
    }
}

pub struct TemplateValidator {
    lookup: Arc<dyn TaskTypeLookup>,
}

impl TemplateValidator {
    pub fn new(lookup: Arc<dyn TaskTypeLookup>) -> Self {
        Self { lookup }
    }

    /// Validate a named template graph; an empty name fails before any
    /// graph check.
    pub async fn validate_template(&self, name: &str, graph: TemplateGraph) -> Result<ValidatedGraph> {
        if name.trim().is_empty() {
            return Err(ValidationFailure::EmptyName.into());
        }
        self.validate(graph).await
    }

    pub async fn validate(&self, graph: TemplateGraph) -> Result<ValidatedGraph> {
        check_unique_nodes(&graph)?;
        check_edge_endpoints(&graph)?;
        self.check_task_types(&graph).await?;
        check_acyclic(&graph)?;

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Workflow graph validated"
        );
        Ok(ValidatedGraph { graph })
    }

    async fn check_task_types(&self, graph: &TemplateGraph) -> Result<()> {
        let mut distinct: Vec<TaskTypeId> = graph.nodes.iter().map(|n| n.task_type_id).collect();
        distinct.sort();
        distinct.dedup();

        let found = try_join_all(
            distinct
                .iter()
                .map(|id| self.lookup.task_type_exists(*id)),
        )
        .await?;
        let known: HashMap<TaskTypeId, bool> = distinct.into_iter().zip(found).collect();

        for node in &graph.nodes {
            if !known.get(&node.task_type_id).copied().unwrap_or(false) {
                return Err(ValidationFailure::UnknownTaskType {
                    node_id: node.node_id.clone(),
                    task_type_id: node.task_type_id.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn check_unique_nodes(graph: &TemplateGraph) -> std::result::Result<(), ValidationFailure> {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.node_id.as_str()) {
            return Err(ValidationFailure::DuplicateNode {
                node_id: node.node_id.clone(),
            });
        }
    }
    Ok(())
}

fn check_edge_endpoints(graph: &TemplateGraph) -> std::result::Result<(), ValidationFailure> {
    let known: HashSet<&str> = graph.nodes.iter().map(|n| n.node_id.as_str()).collect();
    for edge in &graph.edges {
        for endpoint in [&edge.from_node_id, &edge.to_node_id] {
            if !known.contains(endpoint.as_str()) {
                return Err(ValidationFailure::DanglingEdge {
                    from: edge.from_node_id.clone(),
                    to: edge.to_node_id.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Check for cycles using DFS with a recursion stack
fn check_acyclic(graph: &TemplateGraph) -> std::result::Result<(), ValidationFailure> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.from_node_id.as_str())
            .or_default()
            .push(edge.to_node_id.as_str());
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for node in &graph.nodes {
        let node_id = node.node_id.as_str();
        if !visited.contains(node_id) {
            if let Some((from, to)) = find_back_edge(node_id, &adjacency, &mut visited, &mut rec_stack) {
                return Err(ValidationFailure::Cycle {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Depth-first walk from `root` on an explicit stack of (node, next child
/// index) frames, so path length is bounded by heap rather than call depth.
fn find_back_edge<'a>(
    root: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<(&'a str, &'a str)> {
    visited.insert(root);
    rec_stack.insert(root);
    let mut frames: Vec<(&'a str, usize)> = vec![(root, 0)];

    while let Some((node_id, cursor)) = frames.last_mut() {
        let node_id: &'a str = *node_id;
        let children: &[&'a str] = adjacency.get(node_id).map(Vec::as_slice).unwrap_or(&[]);

        match children.get(*cursor) {
            Some(&child) => {
                *cursor += 1;
                if !visited.contains(child) {
                    visited.insert(child);
                    rec_stack.insert(child);
                    frames.push((child, 0));
                } else if rec_stack.contains(child) {
                    return Some((node_id, child));
                }
            }
            None => {
                rec_stack.remove(node_id);
                frames.pop();
            }
        }
    }
    None
}
