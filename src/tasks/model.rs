use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{ActorId, EventId, InstanceId, TaskId, TaskTypeId, TemplateId};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Todo,
        TaskState::InProgress,
        TaskState::Blocked,
        TaskState::Done,
        TaskState::Cancelled,
    ];

    /// States reachable from `self` through a requested transition.
    ///
    /// BLOCKED -> TODO is absent: only the unlock cascade performs it.
    pub fn allowed_targets(self) -> &'static [TaskState] {
        match self {
            TaskState::Todo => &[TaskState::InProgress],
            TaskState::InProgress => &[TaskState::Done, TaskState::Blocked],
            TaskState::Blocked => &[TaskState::InProgress],
            TaskState::Done | TaskState::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: TaskState) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Todo => "TODO",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Blocked => "BLOCKED",
            TaskState::Done => "DONE",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown task state: {}", s))
    }
}

/// Soft-delete tag. Deleted rows stay in the store but are hidden from reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    Active,
    Deleted { at: DateTime<Utc>, by: ActorId },
}

impl Presence {
    pub fn is_active(&self) -> bool {
        matches!(self, Presence::Active)
    }
}

/// A live unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// `None` for tasks created outside any workflow instance
    pub instance_id: Option<InstanceId>,
    pub event_id: EventId,
    pub task_type_id: TaskTypeId,
    pub label: String,
    pub description: String,
    pub state: TaskState,
    pub assignee: Option<ActorId>,
    pub created_by: ActorId,
    pub presence: Presence,
    /// Bumped on every committed write; the optimistic-concurrency token
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        event_id: EventId,
        task_type_id: TaskTypeId,
        label: impl Into<String>,
        created_by: ActorId,
        state: TaskState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            instance_id: None,
            event_id,
            task_type_id,
            label: label.into(),
            description: String::new(),
            state,
            assignee: None,
            created_by,
            presence: Presence::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }

    /// Next image of this task, carrying the bumped version.
    pub fn next_revision(&self) -> Task {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next
    }
}

/// `task_id` cannot start until `depends_on_task_id` is DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: TaskId,
    pub depends_on_task_id: TaskId,
}

/// Why a state change happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionCause {
    /// An actor asked for it through `transition` or `pick`
    Requested,
    /// The unlock cascade released a blocked task
    Unlocked,
}

/// Append-only log entry, one per committed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub task_id: TaskId,
    pub from_state: TaskState,
    pub to_state: TaskState,
    pub actor: ActorId,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// Audit row for an assignee change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentAudit {
    pub task_id: TaskId,
    pub old_assignee: Option<ActorId>,
    pub new_assignee: Option<ActorId>,
    pub changed_by: ActorId,
    pub at: DateTime<Utc>,
}

/// Binding of one template to one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub template_id: TemplateId,
    pub template_revision: u32,
    pub event_id: EventId,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}
