//! A delegating store that can stall chosen reads, used to pin down
//! interleavings that are otherwise timing dependent.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use eventflow::storage::{
    CommitReceipt, EligibilityMapping, InstanceGraph, Store, TaskMutation, TaskType,
};
use eventflow::tasks::{AssignmentAudit, Instance, Task, TransitionRecord};
use eventflow::workflow::TemplateRecord;
use eventflow::{ActorId, EventId, InstanceId, Result, RoleId, TaskId, TaskTypeId, TemplateId};

/// Handshake for one stalled read: `fetched` fires once the inner store has
/// answered, and the read returns only after `release`.
#[derive(Default)]
pub struct Pause {
    pub fetched: Notify,
    pub release: Notify,
}

pub struct HookedStore {
    inner: Arc<dyn Store>,
    eligibility_pause: Mutex<Option<Arc<Pause>>>,
    dependents_delay: Option<Duration>,
}

impl HookedStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            eligibility_pause: Mutex::new(None),
            dependents_delay: None,
        }
    }

    pub fn with_dependents_delay(mut self, delay: Duration) -> Self {
        self.dependents_delay = Some(delay);
        self
    }

    /// Stall the next `eligible_task_types` read after it has fetched
    pub fn pause_next_eligibility_read(&self) -> Arc<Pause> {
        let pause = Arc::new(Pause::default());
        *self.eligibility_pause.lock().unwrap() = Some(pause.clone());
        pause
    }
}

#[async_trait]
impl Store for HookedStore {
    async fn put_template(&self, template: &TemplateRecord) -> Result<()> {
        self.inner.put_template(template).await
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>> {
        self.inner.get_template(id).await
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRecord>> {
        self.inner.list_templates().await
    }

    async fn put_task_type(&self, task_type: &TaskType) -> Result<()> {
        self.inner.put_task_type(task_type).await
    }

    async fn get_task_type(&self, id: TaskTypeId) -> Result<Option<TaskType>> {
        self.inner.get_task_type(id).await
    }

    async fn grant_eligibility(&self, mapping: &EligibilityMapping) -> Result<()> {
        self.inner.grant_eligibility(mapping).await
    }

    async fn revoke_eligibility(&self, mapping: &EligibilityMapping) -> Result<bool> {
        self.inner.revoke_eligibility(mapping).await
    }

    async fn eligible_task_types(&self, role: &RoleId) -> Result<Vec<TaskTypeId>> {
        let types = self.inner.eligible_task_types(role).await?;
        let pause = self.eligibility_pause.lock().unwrap().take();
        if let Some(pause) = pause {
            pause.fetched.notify_one();
            pause.release.notified().await;
        }
        Ok(types)
    }

    async fn add_member(&self, event_id: EventId, actor_id: ActorId) -> Result<()> {
        self.inner.add_member(event_id, actor_id).await
    }

    async fn remove_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        self.inner.remove_member(event_id, actor_id).await
    }

    async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        self.inner.is_member(event_id, actor_id).await
    }

    async fn create_instance_graph(&self, graph: &InstanceGraph) -> Result<()> {
        self.inner.create_instance_graph(graph).await
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Option<Instance>> {
        self.inner.get_instance(id).await
    }

    async fn list_instances(&self, event_id: Option<EventId>) -> Result<Vec<Instance>> {
        self.inner.list_instances(event_id).await
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        self.inner.create_task(task).await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self, event_id: Option<EventId>) -> Result<Vec<Task>> {
        self.inner.list_tasks(event_id).await
    }

    async fn list_instance_tasks(&self, instance_id: InstanceId) -> Result<Vec<Task>> {
        self.inner.list_instance_tasks(instance_id).await
    }

    async fn dependencies_of(&self, id: TaskId) -> Result<Vec<TaskId>> {
        self.inner.dependencies_of(id).await
    }

    async fn dependents_of(&self, id: TaskId) -> Result<Vec<TaskId>> {
        if let Some(delay) = self.dependents_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.dependents_of(id).await
    }

    async fn commit_task_mutation(&self, mutation: &TaskMutation) -> Result<CommitReceipt> {
        self.inner.commit_task_mutation(mutation).await
    }

    async fn transitions_of(&self, id: TaskId) -> Result<Vec<TransitionRecord>> {
        self.inner.transitions_of(id).await
    }

    async fn assignments_of(&self, id: TaskId) -> Result<Vec<AssignmentAudit>> {
        self.inner.assignments_of(id).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}
