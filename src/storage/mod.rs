//! Storage layer for eventflow
//!
//! The [`Store`] trait is the authoritative entity store. Task rows are never
//! cached above it; every state read goes through here. The only multi-row
//! writes are [`Store::create_instance_graph`] and
//! [`Store::commit_task_mutation`], and both are all-or-nothing.

pub mod sled_storage;

pub use sled_storage::SledStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::ids::{ActorId, EventId, InstanceId, RoleId, TaskId, TaskTypeId, TemplateId};
use crate::tasks::model::{
    AssignmentAudit, Dependency, Instance, Presence, Task, TransitionRecord,
};
use crate::workflow::template::TemplateRecord;

/// Kind of work a task represents; referenced by template nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskType {
    pub id: TaskTypeId,
    pub name: String,
    pub presence: Presence,
    pub created_at: DateTime<Utc>,
}

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskTypeId::generate(),
            name: name.into(),
            presence: Presence::Active,
            created_at: Utc::now(),
        }
    }
}

/// Allow-list entry: actors holding `role` may pick tasks of `task_type_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EligibilityMapping {
    pub role: RoleId,
    pub task_type_id: TaskTypeId,
}

/// Everything written by one instantiation
#[derive(Debug, Clone)]
pub struct InstanceGraph {
    pub instance: Instance,
    pub tasks: Vec<Task>,
    pub dependencies: Vec<Dependency>,
}

/// A single-task write guarded by the version the caller read.
#[derive(Debug, Clone)]
pub struct TaskMutation {
    /// Version the new image was derived from; a mismatch is a conflict
    pub expected_version: u64,
    pub task: Task,
    pub transition: Option<TransitionRecord>,
    pub assignment: Option<AssignmentAudit>,
    /// Direct children whose unlock guard is evaluated in the same commit
    pub unlock_candidates: Vec<TaskId>,
}

impl TaskMutation {
    pub fn new(expected_version: u64, task: Task) -> Self {
        Self {
            expected_version,
            task,
            transition: None,
            assignment: None,
            unlock_candidates: Vec::new(),
        }
    }

    pub fn with_transition(mut self, record: TransitionRecord) -> Self {
        self.transition = Some(record);
        self
    }

    pub fn with_assignment(mut self, audit: AssignmentAudit) -> Self {
        self.assignment = Some(audit);
        self
    }

    pub fn with_unlock_candidates(mut self, children: Vec<TaskId>) -> Self {
        self.unlock_candidates = children;
        self
    }
}

/// Outcome of a committed [`TaskMutation`]
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub task: Task,
    /// Children moved BLOCKED -> TODO by this commit
    pub unlocked: Vec<TaskId>,
}

/// Entity store for templates, reference data, instances and tasks
#[async_trait]
pub trait Store: Send + Sync {
    // Templates
    async fn put_template(&self, template: &TemplateRecord) -> Result<()>;
    async fn get_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>>;
    async fn list_templates(&self) -> Result<Vec<TemplateRecord>>;

    // Task types
    async fn put_task_type(&self, task_type: &TaskType) -> Result<()>;
    async fn get_task_type(&self, id: TaskTypeId) -> Result<Option<TaskType>>;

    // Eligibility
    async fn grant_eligibility(&self, mapping: &EligibilityMapping) -> Result<()>;
    async fn revoke_eligibility(&self, mapping: &EligibilityMapping) -> Result<bool>;
    async fn eligible_task_types(&self, role: &RoleId) -> Result<Vec<TaskTypeId>>;

    // Event membership
    async fn add_member(&self, event_id: EventId, actor_id: ActorId) -> Result<()>;
    async fn remove_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool>;
    async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool>;

    // Instances
    /// Write an instance with all its tasks and dependencies atomically
    async fn create_instance_graph(&self, graph: &InstanceGraph) -> Result<()>;
    async fn get_instance(&self, id: InstanceId) -> Result<Option<Instance>>;
    async fn list_instances(&self, event_id: Option<EventId>) -> Result<Vec<Instance>>;

    // Tasks
    /// Insert a task that belongs to no instance
    async fn create_task(&self, task: &Task) -> Result<()>;
    /// Raw read, including soft-deleted rows
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn list_tasks(&self, event_id: Option<EventId>) -> Result<Vec<Task>>;
    async fn list_instance_tasks(&self, instance_id: InstanceId) -> Result<Vec<Task>>;
    /// Tasks `id` waits on
    async fn dependencies_of(&self, id: TaskId) -> Result<Vec<TaskId>>;
    /// Tasks waiting on `id`
    async fn dependents_of(&self, id: TaskId) -> Result<Vec<TaskId>>;
    /// Apply a version-checked task write, its history rows and the one-hop
    /// unlock cascade in a single transaction
    async fn commit_task_mutation(&self, mutation: &TaskMutation) -> Result<CommitReceipt>;
    async fn transitions_of(&self, id: TaskId) -> Result<Vec<TransitionRecord>>;
    async fn assignments_of(&self, id: TaskId) -> Result<Vec<AssignmentAudit>>;

    /// Flush pending writes
    async fn flush(&self) -> Result<()>;
}
