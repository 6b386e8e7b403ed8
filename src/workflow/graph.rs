use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use crate::core::errors::{EngineError, Result};
use crate::ids::TaskId;
use crate::tasks::model::{Dependency, Task, TaskState};

/// Task graph of one instance; edges point from prerequisite to dependent.
pub fn task_graph(tasks: &[Task], dependencies: &[Dependency]) -> DiGraph<Task, ()> {
    let mut graph = DiGraph::with_capacity(tasks.len(), dependencies.len());
    let mut index: HashMap<TaskId, NodeIndex> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        index.insert(task.id, graph.add_node(task.clone()));
    }
    for dep in dependencies {
        if let (Some(from), Some(to)) = (index.get(&dep.depends_on_task_id), index.get(&dep.task_id)) {
            graph.add_edge(*from, *to, ());
        }
    }
    graph
}

/// Tasks ordered so every prerequisite precedes its dependents
pub fn execution_order(graph: &DiGraph<Task, ()>) -> Result<Vec<&Task>> {
    let order = toposort(graph, None).map_err(|cycle| {
        EngineError::internal(format!(
            "instance graph has a cycle through task {}",
            graph[cycle.node_id()].id
        ))
    })?;
    Ok(order.into_iter().map(|idx| &graph[idx]).collect())
}

fn fill_color(state: TaskState) -> &'static str {
    match state {
        TaskState::Todo => "#FFFFFF",
        TaskState::InProgress => "#FFF3C4",
        TaskState::Blocked => "#E8E8E8",
        TaskState::Done => "#CDEFD1",
        TaskState::Cancelled => "#F6D0D0",
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Serializes a task graph to DOT format for visualization. Node
/// statements follow execution order.
pub fn to_dot(graph: &DiGraph<Task, ()>) -> Result<String> {
    let mut dot = String::from("digraph Workflow {\n");
    dot.push_str("  graph [rankdir=LR, nodesep=0.5, ranksep=1.0];\n");
    dot.push_str("  node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\"];\n\n");

    for task in execution_order(graph)? {
        let assignee = task
            .assignee
            .map(|id| format!("\\n@{}", id))
            .unwrap_or_default();
        dot.push_str(&format!(
            "  \"{}\" [label=\"{}\\n{}{}\", fillcolor=\"{}\"];\n",
            task.id,
            escape(&task.label),
            task.state,
            assignee,
            fill_color(task.state)
        ));
    }

    dot.push('\n');
    for edge in graph.edge_references() {
        dot.push_str(&format!(
            "  \"{}\" -> \"{}\";\n",
            graph[edge.source()].id,
            graph[edge.target()].id
        ));
    }
    dot.push_str("}\n");
    Ok(dot)
}
