//! Service boundary.
//!
//! Operations take the resolved [`Actor`] plus raw string ids. Business-rule
//! failures come back inside the envelope with `ok: false`; only malformed
//! input, timeouts and infrastructure faults use [`BoundaryError`].

use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthorizationGate, RoleTable};
use crate::core::config::EngineConfig;
use crate::core::errors::{EngineError, Result};
use crate::ids::{Actor, ActorId, EventId, InstanceId, TaskId, TaskTypeId, TemplateId};
use crate::reference::ReferenceData;
use crate::storage::{SledStore, Store};
use crate::tasks::model::{AssignmentAudit, Dependency, Task, TaskState, TransitionRecord};
use crate::tasks::TaskLifecycle;
use crate::workflow::graph::{task_graph, to_dot};
use crate::workflow::{
    Edge, Instantiator, Node, TemplateGraph, TemplateRecord, TemplateSource, TemplateValidator,
};

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("operation timed out")]
    Timeout,

    /// Details are logged, never returned
    #[error("internal error")]
    Internal,
}

/// Uniform envelope for mutating operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Envelope for reads
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> From<std::result::Result<T, String>> for QueryResult<T> {
    fn from(outcome: std::result::Result<T, String>) -> Self {
        match outcome {
            Ok(data) => Self {
                ok: true,
                error: None,
                data: Some(data),
            },
            Err(message) => Self {
                ok: false,
                error: Some(message),
                data: None,
            },
        }
    }
}

fn parse<T: FromStr>(field: &str, raw: &str) -> std::result::Result<T, BoundaryError> {
    raw.parse()
        .map_err(|_| BoundaryError::MalformedInput(format!("invalid {}: '{}'", field, raw)))
}

pub struct WorkflowService {
    store: Arc<dyn Store>,
    reference: Arc<ReferenceData>,
    gate: Arc<AuthorizationGate>,
    validator: TemplateValidator,
    instantiator: Instantiator,
    tasks: TaskLifecycle,
    operation_timeout: Duration,
}

impl WorkflowService {
    /// Open the configured sled store and wire every component
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn Store> = Arc::new(SledStore::open(&config.storage)?);
        Self::with_store(store, config)
    }

    pub fn with_store(store: Arc<dyn Store>, config: &EngineConfig) -> Result<Self> {
        let reference = Arc::new(ReferenceData::new(store.clone(), &config.cache)?);
        let gate = Arc::new(AuthorizationGate::new(
            RoleTable::from_config(&config.authorization),
            config.authorization.transition_policy,
            reference.clone(),
            reference.clone(),
        ));

        info!(
            roles = config.authorization.roles.len(),
            policy = ?config.authorization.transition_policy,
            "Workflow service ready"
        );
        Ok(Self {
            validator: TemplateValidator::new(reference.clone()),
            instantiator: Instantiator::new(store.clone(), reference.clone(), gate.clone()),
            tasks: TaskLifecycle::new(store.clone(), gate.clone()),
            operation_timeout: config.operation_timeout(),
            store,
            reference,
            gate,
        })
    }

    /// Reference data administration (task types, eligibility, membership)
    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    /// Run one operation under the timeout and sort its error into the
    /// envelope or the transport.
    async fn run<T, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> std::result::Result<std::result::Result<T, String>, BoundaryError>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match timeout(self.operation_timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(operation, timeout = ?self.operation_timeout, "Operation timed out");
                return Err(BoundaryError::Timeout);
            }
        };

        match outcome {
            Ok(value) => Ok(Ok(value)),
            Err(err) if err.is_business() => {
                debug!(operation, category = err.category(), "{}", err);
                Ok(Err(err.to_string()))
            }
            Err(err) => {
                error!(
                    operation,
                    category = err.category(),
                    source = ?std::error::Error::source(&err),
                    "{}",
                    err
                );
                Err(BoundaryError::Internal)
            }
        }
    }

    fn action<T>(
        outcome: std::result::Result<T, String>,
        fill: impl FnOnce(T, &mut ActionResult),
    ) -> ActionResult {
        match outcome {
            Ok(value) => {
                let mut result = ActionResult::success();
                fill(value, &mut result);
                result
            }
            Err(message) => ActionResult::failure(message),
        }
    }

    fn require_author(&self, actor: &Actor) -> Result<()> {
        if self.gate.can_author_templates(actor) {
            Ok(())
        } else {
            warn!(actor = %actor.id, role = %actor.role, "Denied template authoring");
            Err(EngineError::unauthorized("author templates", actor.id))
        }
    }

    pub async fn validate_and_save_template(
        &self,
        actor: &Actor,
        name: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let outcome = self
            .run("validate_and_save_template", async {
                self.require_author(actor)?;
                let validated = self
                    .validator
                    .validate_template(name, TemplateGraph::new(nodes, edges))
                    .await?;
                let record = TemplateRecord::new(name.trim(), actor.id, validated.into_inner());
                self.reference.save_template(&record).await?;
                info!(template_id = %record.id, name = %record.name, "Template saved");
                Ok(record.id)
            })
            .await?;
        Ok(Self::action(outcome, |id, result| {
            result.template_id = Some(id.to_string())
        }))
    }

    /// Overwrite an existing template in place, bumping its revision
    pub async fn update_template(
        &self,
        actor: &Actor,
        template_id: &str,
        name: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let template_id: TemplateId = parse("template id", template_id)?;
        let outcome = self
            .run("update_template", async {
                self.require_author(actor)?;
                let current = self
                    .reference
                    .template(template_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("template", template_id))?;
                let validated = self
                    .validator
                    .validate_template(name, TemplateGraph::new(nodes, edges))
                    .await?;
                let record = current.overwrite(name.trim(), actor.id, validated.into_inner());
                self.reference.update_template(&record).await?;
                info!(template_id = %record.id, revision = record.revision, "Template updated");
                Ok(record.id)
            })
            .await?;
        Ok(Self::action(outcome, |id, result| {
            result.template_id = Some(id.to_string())
        }))
    }

    /// Instantiate a template for an event. Supplied nodes/edges replace the
    /// template's own and are validated like a new template.
    pub async fn instantiate(
        &self,
        actor: &Actor,
        template_id: &str,
        event_id: &str,
        nodes: Option<Vec<Node>>,
        edges: Option<Vec<Edge>>,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let template_id: TemplateId = parse("template id", template_id)?;
        let event_id: EventId = parse("event id", event_id)?;
        let outcome = self
            .run("instantiate", async {
                let template = self
                    .reference
                    .template(template_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("template", template_id))?;
                let graph = TemplateGraph::new(
                    nodes.unwrap_or_else(|| template.graph.nodes.clone()),
                    edges.unwrap_or_else(|| template.graph.edges.clone()),
                );
                let validated = self.validator.validate(graph).await?;
                let source = TemplateSource {
                    template_id,
                    revision: template.revision,
                };
                self.instantiator
                    .instantiate(actor, source, event_id, &validated)
                    .await
            })
            .await?;
        Ok(Self::action(outcome, |id, result| {
            result.instance_id = Some(id.to_string())
        }))
    }

    pub async fn pick(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        let outcome = self.run("pick", self.tasks.pick(actor, task_id)).await?;
        Ok(Self::action(outcome, |_, _| {}))
    }

    pub async fn transition(
        &self,
        actor: &Actor,
        task_id: &str,
        next_state: &str,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        let target: TaskState = parse("state", next_state)?;
        let outcome = self
            .run("transition", self.tasks.transition(actor, task_id, target))
            .await?;
        Ok(Self::action(outcome, |_, _| {}))
    }

    /// Reassign a task; `None` clears the assignee
    pub async fn assign(
        &self,
        actor: &Actor,
        task_id: &str,
        user_id: Option<&str>,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        let assignee: Option<ActorId> = user_id.map(|raw| parse("user id", raw)).transpose()?;
        let outcome = self
            .run("assign", self.tasks.assign(actor, task_id, assignee))
            .await?;
        Ok(Self::action(outcome, |_, _| {}))
    }

    pub async fn create_task(
        &self,
        actor: &Actor,
        event_id: &str,
        task_type_id: &str,
        label: &str,
        description: &str,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let event_id: EventId = parse("event id", event_id)?;
        let task_type_id: TaskTypeId = parse("task type id", task_type_id)?;
        let outcome = self
            .run("create_task", async {
                if self.reference.task_type(task_type_id).await?.is_none() {
                    return Err(EngineError::not_found("task type", task_type_id));
                }
                self.tasks
                    .create_task(actor, event_id, task_type_id, label, description)
                    .await
            })
            .await?;
        Ok(Self::action(outcome, |task, result| {
            result.task_id = Some(task.id.to_string())
        }))
    }

    pub async fn delete_task(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> std::result::Result<ActionResult, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        let outcome = self
            .run("delete_task", self.tasks.delete_task(actor, task_id))
            .await?;
        Ok(Self::action(outcome, |_, _| {}))
    }

    pub async fn get_task(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> std::result::Result<QueryResult<Task>, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        Ok(self.run("get_task", self.tasks.get_task(actor, task_id)).await?.into())
    }

    pub async fn list_tasks(
        &self,
        actor: &Actor,
        event_id: Option<&str>,
    ) -> std::result::Result<QueryResult<Vec<Task>>, BoundaryError> {
        let event_id: Option<EventId> = event_id.map(|raw| parse("event id", raw)).transpose()?;
        Ok(self
            .run("list_tasks", self.tasks.list_tasks(actor, event_id))
            .await?
            .into())
    }

    pub async fn history(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> std::result::Result<QueryResult<Vec<TransitionRecord>>, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        Ok(self.run("history", self.tasks.history(actor, task_id)).await?.into())
    }

    pub async fn assignments(
        &self,
        actor: &Actor,
        task_id: &str,
    ) -> std::result::Result<QueryResult<Vec<AssignmentAudit>>, BoundaryError> {
        let task_id: TaskId = parse("task id", task_id)?;
        Ok(self
            .run("assignments", self.tasks.assignments(actor, task_id))
            .await?
            .into())
    }

    /// Graphviz rendering of an instance's task graph with live states
    pub async fn render_instance_dot(
        &self,
        actor: &Actor,
        instance_id: &str,
    ) -> std::result::Result<QueryResult<String>, BoundaryError> {
        let instance_id: InstanceId = parse("instance id", instance_id)?;
        let outcome = self
            .run("render_instance_dot", async {
                let instance = self
                    .store
                    .get_instance(instance_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("instance", instance_id))?;
                if !self.gate.scope(actor, instance.event_id).await? {
                    return Err(EngineError::unauthorized("view instance", actor.id));
                }

                let tasks = self.store.list_instance_tasks(instance_id).await?;
                let mut dependencies = Vec::new();
                for task in &tasks {
                    for parent in self.store.dependencies_of(task.id).await? {
                        dependencies.push(Dependency {
                            task_id: task.id,
                            depends_on_task_id: parent,
                        });
                    }
                }
                to_dot(&task_graph(&tasks, &dependencies))
            })
            .await?;
        Ok(outcome.into())
    }

    /// Flush the underlying store
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let mut result = ActionResult::success();
        result.instance_id = Some("abc".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "instanceId": "abc"}));

        let json = serde_json::to_value(ActionResult::failure("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"ok": false, "error": "nope"}));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            parse::<TaskId>("task id", "xyz"),
            Err(BoundaryError::MalformedInput("invalid task id: 'xyz'".to_string()))
        );
        assert_eq!(parse::<TaskState>("state", "in_progress"), Ok(TaskState::InProgress));
    }
}
