//! Materializes a validated template graph into live tasks for one event.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AuthorizationGate;
use crate::core::errors::{EngineError, Result, ValidationFailure};
use crate::ids::{Actor, EventId, InstanceId, TaskId, TemplateId};
use crate::storage::{InstanceGraph, Store};
use crate::tasks::model::{Dependency, Instance, Task, TaskState};
use crate::workflow::validator::{TaskTypeLookup, ValidatedGraph};

/// Which template (and revision) an instantiation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSource {
    pub template_id: TemplateId,
    pub revision: u32,
}

pub struct Instantiator {
    store: Arc<dyn Store>,
    task_types: Arc<dyn TaskTypeLookup>,
    gate: Arc<AuthorizationGate>,
}

impl Instantiator {
    pub fn new(
        store: Arc<dyn Store>,
        task_types: Arc<dyn TaskTypeLookup>,
        gate: Arc<AuthorizationGate>,
    ) -> Self {
        Self {
            store,
            task_types,
            gate,
        }
    }

    pub async fn instantiate(
        &self,
        actor: &Actor,
        source: TemplateSource,
        event_id: EventId,
        graph: &ValidatedGraph,
    ) -> Result<InstanceId> {
        if !self.gate.can_instantiate(actor, event_id).await? {
            warn!(event_id = %event_id, actor = %actor.id, "Denied instantiate");
            return Err(EngineError::unauthorized("instantiate workflow", actor.id));
        }

        // Task types may have been retired since validation.
        for node in &graph.graph().nodes {
            if !self.task_types.task_type_exists_fresh(node.task_type_id).await? {
                return Err(ValidationFailure::UnknownTaskType {
                    node_id: node.node_id.clone(),
                    task_type_id: node.task_type_id.to_string(),
                }
                .into());
            }
        }

        let materialized = materialize(actor, source, event_id, graph);
        let instance_id = materialized.instance.id;
        self.store.create_instance_graph(&materialized).await?;

        info!(
            instance_id = %instance_id,
            template_id = %source.template_id,
            event_id = %event_id,
            tasks = materialized.tasks.len(),
            "Workflow instantiated"
        );
        Ok(instance_id)
    }
}

/// Build the instance image: one task per node, one dependency per edge.
/// A task starts BLOCKED iff its node has an incoming edge.
pub fn materialize(
    actor: &Actor,
    source: TemplateSource,
    event_id: EventId,
    graph: &ValidatedGraph,
) -> InstanceGraph {
    let graph = graph.graph();
    let instance = Instance {
        id: InstanceId::generate(),
        template_id: source.template_id,
        template_revision: source.revision,
        event_id,
        created_by: actor.id,
        created_at: Utc::now(),
    };

    let in_degrees = graph.in_degrees();
    let mut task_ids: HashMap<&str, TaskId> = HashMap::with_capacity(graph.nodes.len());
    let mut tasks = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let state = match in_degrees.get(node.node_id.as_str()) {
            Some(degree) if *degree > 0 => TaskState::Blocked,
            _ => TaskState::Todo,
        };
        let mut task = Task::new(event_id, node.task_type_id, node.label.clone(), actor.id, state)
            .with_instance(instance.id);
        if let Some(metadata) = &node.metadata {
            task.description = metadata.description.clone();
        }
        task_ids.insert(node.node_id.as_str(), task.id);
        tasks.push(task);
    }

    let dependencies = graph
        .edges
        .iter()
        .filter_map(|edge| {
            let from = task_ids.get(edge.from_node_id.as_str())?;
            let to = task_ids.get(edge.to_node_id.as_str())?;
            Some(Dependency {
                task_id: *to,
                depends_on_task_id: *from,
            })
        })
        .collect();

    InstanceGraph {
        instance,
        tasks,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ActorId, TaskTypeId};
    use crate::workflow::template::{Edge, Node, TemplateGraph};
    use crate::workflow::validator::TemplateValidator;
    use async_trait::async_trait;

    struct AnyType;

    #[async_trait]
    impl TaskTypeLookup for AnyType {
        async fn task_type_exists(&self, _id: TaskTypeId) -> Result<bool> {
            Ok(true)
        }

        async fn task_type_exists_fresh(&self, _id: TaskTypeId) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_materialize_shape() {
        let tt = TaskTypeId::generate();
        let graph = TemplateGraph::new(
            vec![Node::new("a", tt, "A"), Node::new("b", tt, "B"), Node::new("c", tt, "C")],
            vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "c")],
        );
        let validated = TemplateValidator::new(Arc::new(AnyType))
            .validate(graph)
            .await
            .unwrap();
        let actor = Actor::new(ActorId::generate(), "admin");
        let source = TemplateSource {
            template_id: TemplateId::generate(),
            revision: 3,
        };

        let built = materialize(&actor, source, EventId::generate(), &validated);

        assert_eq!(built.instance.template_revision, 3);
        assert_eq!(built.tasks.len(), 3);
        assert_eq!(built.dependencies.len(), 3);
        let states: Vec<TaskState> = built.tasks.iter().map(|t| t.state).collect();
        assert_eq!(states, vec![TaskState::Todo, TaskState::Blocked, TaskState::Blocked]);

        let by_label: HashMap<&str, TaskId> =
            built.tasks.iter().map(|t| (t.label.as_str(), t.id)).collect();
        assert!(built.dependencies.contains(&Dependency {
            task_id: by_label["C"],
            depends_on_task_id: by_label["B"],
        }));
        assert!(built.tasks.iter().all(|t| t.created_by == actor.id));
        assert!(built.tasks.iter().all(|t| t.instance_id == Some(built.instance.id)));
    }
}
