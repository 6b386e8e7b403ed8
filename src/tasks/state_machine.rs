//! Task lifecycle operations.
//!
//! Each operation reads the task, runs its authorization predicate, plans the
//! new image with a pure `plan_*` function, then hands one [`TaskMutation`]
//! to the store. The commit is the only write, so an operation abandoned
//! before it leaves the task untouched.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::AuthorizationGate;
use crate::core::errors::{EngineError, Result};
use crate::ids::{Actor, ActorId, EventId, TaskId, TaskTypeId};
use crate::storage::{CommitReceipt, Store, TaskMutation};
use crate::tasks::model::{
    AssignmentAudit, Presence, Task, TaskState, TransitionCause, TransitionRecord,
};

/// One-hop unlock guard: a live BLOCKED child is released once every parent
/// is DONE. `parent_states` must already reflect the commit being applied.
pub fn ready_to_unlock(child: &Task, parent_states: &[TaskState]) -> bool {
    child.presence.is_active()
        && child.state == TaskState::Blocked
        && parent_states.iter().all(|state| *state == TaskState::Done)
}

fn invalid(task: &Task, to: TaskState) -> EngineError {
    EngineError::InvalidTransition {
        task_id: task.id.to_string(),
        from: task.state,
        to,
    }
}

/// Plan a requested state change. Completing a task lists its direct
/// children as unlock candidates.
pub fn plan_transition(
    task: &Task,
    target: TaskState,
    actor: &Actor,
    children: Vec<TaskId>,
) -> Result<TaskMutation> {
    if !task.state.can_transition_to(target) {
        return Err(invalid(task, target));
    }

    let mut next = task.next_revision();
    next.state = target;
    let record = TransitionRecord {
        task_id: task.id,
        from_state: task.state,
        to_state: target,
        actor: actor.id,
        cause: TransitionCause::Requested,
        at: next.updated_at,
    };

    let mut mutation = TaskMutation::new(task.version, next).with_transition(record);
    if target == TaskState::Done {
        mutation = mutation.with_unlock_candidates(children);
    }
    Ok(mutation)
}

pub fn ensure_unassigned(task: &Task) -> Result<()> {
    match task.assignee {
        Some(assignee) => Err(EngineError::AlreadyAssigned {
            task_id: task.id.to_string(),
            assignee: assignee.to_string(),
        }),
        None => Ok(()),
    }
}

/// Plan `pick`: claim an unassigned TODO task and start it.
pub fn plan_pick(task: &Task, actor: &Actor) -> Result<TaskMutation> {
    ensure_unassigned(task)?;
    if task.state != TaskState::Todo {
        return Err(invalid(task, TaskState::InProgress));
    }

    let mut mutation = plan_transition(task, TaskState::InProgress, actor, Vec::new())?;
    mutation.task.assignee = Some(actor.id);
    let audit = AssignmentAudit {
        task_id: task.id,
        old_assignee: None,
        new_assignee: Some(actor.id),
        changed_by: actor.id,
        at: mutation.task.updated_at,
    };
    Ok(mutation.with_assignment(audit))
}

/// Plan an assignee change. Returns `None` when nothing would change.
pub fn plan_assign(
    task: &Task,
    new_assignee: Option<ActorId>,
    actor: &Actor,
) -> Result<Option<TaskMutation>> {
    if task.state.is_terminal() {
        return Err(invalid(task, task.state));
    }
    if task.assignee == new_assignee {
        return Ok(None);
    }

    let mut next = task.next_revision();
    next.assignee = new_assignee;
    let audit = AssignmentAudit {
        task_id: task.id,
        old_assignee: task.assignee,
        new_assignee,
        changed_by: actor.id,
        at: next.updated_at,
    };
    Ok(Some(TaskMutation::new(task.version, next).with_assignment(audit)))
}

pub fn plan_delete(task: &Task, actor: &Actor) -> TaskMutation {
    let mut next = task.next_revision();
    next.presence = Presence::Deleted {
        at: next.updated_at,
        by: actor.id,
    };
    TaskMutation::new(task.version, next)
}

/// Task operations gated by authorization
pub struct TaskLifecycle {
    store: Arc<dyn Store>,
    gate: Arc<AuthorizationGate>,
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn Store>, gate: Arc<AuthorizationGate>) -> Self {
        Self { store, gate }
    }

    /// Read a live task; soft-deleted rows are reported as missing.
    async fn load(&self, id: TaskId) -> Result<Task> {
        match self.store.get_task(id).await? {
            Some(task) if task.presence.is_active() => Ok(task),
            _ => Err(EngineError::not_found("task", id)),
        }
    }

    fn denied(&self, action: &'static str, actor: &Actor, task_id: TaskId) -> EngineError {
        warn!(task_id = %task_id, actor = %actor.id, role = %actor.role, "Denied {}", action);
        EngineError::unauthorized(action, actor.id)
    }

    async fn commit(&self, mutation: &TaskMutation) -> Result<CommitReceipt> {
        match self.store.commit_task_mutation(mutation).await {
            Err(err @ EngineError::Conflict { .. }) => {
                warn!(task_id = %mutation.task.id, "Lost concurrent update");
                Err(err)
            }
            other => other,
        }
    }

    pub async fn transition(
        &self,
        actor: &Actor,
        task_id: TaskId,
        target: TaskState,
    ) -> Result<CommitReceipt> {
        let task = self.load(task_id).await?;
        if !self.gate.can_transition(actor, &task).await? {
            return Err(self.denied("transition task", actor, task_id));
        }

        let children = if target == TaskState::Done {
            self.store.dependents_of(task_id).await?
        } else {
            Vec::new()
        };
        let mutation = plan_transition(&task, target, actor, children).map_err(|err| {
            debug!(task_id = %task_id, from = %task.state, to = %target, "Transition rejected");
            err
        })?;

        let receipt = self.commit(&mutation).await?;
        info!(
            task_id = %task_id,
            actor = %actor.id,
            from = %task.state,
            to = %target,
            "Task transitioned"
        );
        for child in &receipt.unlocked {
            info!(task_id = %child, parent = %task_id, "Task unlocked");
        }
        Ok(receipt)
    }

    pub async fn pick(&self, actor: &Actor, task_id: TaskId) -> Result<CommitReceipt> {
        let task = self.load(task_id).await?;
        // A taken task reports its holder before the permission check.
        ensure_unassigned(&task)?;
        if !self.gate.can_pick(actor, &task).await? {
            return Err(self.denied("pick task", actor, task_id));
        }

        let mutation = plan_pick(&task, actor)?;
        let receipt = self.commit(&mutation).await?;
        info!(task_id = %task_id, actor = %actor.id, "Task picked");
        Ok(receipt)
    }

    pub async fn assign(
        &self,
        actor: &Actor,
        task_id: TaskId,
        new_assignee: Option<ActorId>,
    ) -> Result<Task> {
        if !self.gate.can_assign(actor) {
            return Err(self.denied("assign task", actor, task_id));
        }
        let task = self.load(task_id).await?;

        match plan_assign(&task, new_assignee, actor)? {
            Some(mutation) => {
                let receipt = self.commit(&mutation).await?;
                info!(
                    task_id = %task_id,
                    actor = %actor.id,
                    assignee = ?new_assignee.map(|id| id.to_string()),
                    "Task assigned"
                );
                Ok(receipt.task)
            }
            None => Ok(task),
        }
    }

    /// Create a standalone task outside any workflow instance
    pub async fn create_task(
        &self,
        actor: &Actor,
        event_id: EventId,
        task_type_id: TaskTypeId,
        label: &str,
        description: &str,
    ) -> Result<Task> {
        if !self.gate.scope(actor, event_id).await? {
            warn!(event_id = %event_id, actor = %actor.id, "Denied create task");
            return Err(EngineError::unauthorized("create task", actor.id));
        }
        let task = Task::new(event_id, task_type_id, label, actor.id, TaskState::Todo)
            .with_description(description);
        self.store.create_task(&task).await?;
        info!(task_id = %task.id, event_id = %event_id, "Task created");
        Ok(task)
    }

    pub async fn get_task(&self, actor: &Actor, task_id: TaskId) -> Result<Task> {
        let task = self.load(task_id).await?;
        if !self.gate.scope(actor, task.event_id).await? {
            return Err(self.denied("view task", actor, task_id));
        }
        Ok(task)
    }

    /// Live tasks visible to `actor`, optionally narrowed to one event
    pub async fn list_tasks(&self, actor: &Actor, event_id: Option<EventId>) -> Result<Vec<Task>> {
        let mut visible = Vec::new();
        for task in self.store.list_tasks(event_id).await? {
            if task.presence.is_active() && self.gate.scope(actor, task.event_id).await? {
                visible.push(task);
            }
        }
        Ok(visible)
    }

    pub async fn delete_task(&self, actor: &Actor, task_id: TaskId) -> Result<()> {
        if !self.gate.can_delete(actor) {
            return Err(self.denied("delete task", actor, task_id));
        }
        let task = self.load(task_id).await?;
        self.commit(&plan_delete(&task, actor)).await?;
        info!(task_id = %task_id, actor = %actor.id, "Task deleted");
        Ok(())
    }

    pub async fn history(&self, actor: &Actor, task_id: TaskId) -> Result<Vec<TransitionRecord>> {
        self.get_task(actor, task_id).await?;
        self.store.transitions_of(task_id).await
    }

    pub async fn assignments(&self, actor: &Actor, task_id: TaskId) -> Result<Vec<AssignmentAudit>> {
        self.get_task(actor, task_id).await?;
        self.store.assignments_of(task_id).await
    }
}
