//! Sled storage implementation for eventflow
//!
//! One tree per entity, bincode-encoded values. Dependency adjacency is
//! stored twice (`task_parents`, `task_children`) as whole lists per task so
//! both directions can be read inside a transaction, where range scans are
//! not available.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    abort, ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{
    CommitReceipt, EligibilityMapping, InstanceGraph, Store, TaskMutation, TaskType,
};
use crate::core::config::StorageConfig;
use crate::core::errors::{EngineError, Result};
use crate::ids::{ActorId, EventId, InstanceId, RoleId, TaskId, TaskTypeId, TemplateId};
use crate::tasks::model::{
    AssignmentAudit, Instance, Task, TaskState, TransitionCause, TransitionRecord,
};
use crate::tasks::state_machine::ready_to_unlock;
use crate::workflow::template::TemplateRecord;

const ROLE_SEPARATOR: u8 = 0xff;

/// Sled-based entity store
pub struct SledStore {
    db: Db,
    templates: Tree,
    task_types: Tree,
    eligibility: Tree,
    memberships: Tree,
    instances: Tree,
    tasks: Tree,
    parents: Tree,
    children: Tree,
    transitions: Tree,
    assignments: Tree,
}

impl SledStore {
    /// Open the store described by `config`
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let mut sled_config = sled::Config::new().flush_every_ms(config.flush_every_ms);
        sled_config = match &config.path {
            Some(path) => {
                info!("Opening sled store at {:?}", path);
                sled_config.path(path).temporary(config.temporary)
            }
            None => sled_config.temporary(true),
        };
        Self::from_db(sled_config.open()?)
    }

    /// Throwaway store deleted on drop
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            templates: db.open_tree("templates")?,
            task_types: db.open_tree("task_types")?,
            eligibility: db.open_tree("eligibility")?,
            memberships: db.open_tree("memberships")?,
            instances: db.open_tree("instances")?,
            tasks: db.open_tree("tasks")?,
            parents: db.open_tree("task_parents")?,
            children: db.open_tree("task_children")?,
            transitions: db.open_tree("transitions")?,
            assignments: db.open_tree("assignments")?,
            db,
        })
    }

    fn get_record<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
        tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn all_records<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
        tree.iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    fn prefixed_records<T: DeserializeOwned>(tree: &Tree, prefix: &[u8]) -> Result<Vec<T>> {
        tree.scan_prefix(prefix)
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    fn id_list(tree: &Tree, id: TaskId) -> Result<Vec<TaskId>> {
        Ok(Self::get_record(tree, id.as_bytes())?.unwrap_or_default())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn history_key(task_id: TaskId, seq: u64) -> Vec<u8> {
    let mut key = task_id.as_bytes().to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn pair_key(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + b.len());
    key.extend_from_slice(a);
    key.extend_from_slice(b);
    key
}

fn role_prefix(role: &RoleId) -> Vec<u8> {
    let mut key = role.as_str().as_bytes().to_vec();
    key.push(ROLE_SEPARATOR);
    key
}

fn tx_decode<T: DeserializeOwned>(
    bytes: &[u8],
) -> std::result::Result<T, ConflictableTransactionError<EngineError>> {
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

fn tx_encode<T: Serialize>(
    value: &T,
) -> std::result::Result<Vec<u8>, ConflictableTransactionError<EngineError>> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

fn tx_get<T: DeserializeOwned>(
    tree: &TransactionalTree,
    key: &[u8],
) -> std::result::Result<Option<T>, ConflictableTransactionError<EngineError>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(tx_decode(&bytes)?)),
        None => Ok(None),
    }
}

fn flatten(err: TransactionError<EngineError>) -> EngineError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => err.into(),
    }
}

#[async_trait]
impl Store for SledStore {
    async fn put_template(&self, template: &TemplateRecord) -> Result<()> {
        self.templates
            .insert(template.id.as_bytes(), encode(template)?)?;
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<TemplateRecord>> {
        Self::get_record(&self.templates, id.as_bytes())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRecord>> {
        Self::all_records(&self.templates)
    }

    async fn put_task_type(&self, task_type: &TaskType) -> Result<()> {
        self.task_types
            .insert(task_type.id.as_bytes(), encode(task_type)?)?;
        Ok(())
    }

    async fn get_task_type(&self, id: TaskTypeId) -> Result<Option<TaskType>> {
        Self::get_record(&self.task_types, id.as_bytes())
    }

    async fn grant_eligibility(&self, mapping: &EligibilityMapping) -> Result<()> {
        let key = pair_key(&role_prefix(&mapping.role), mapping.task_type_id.as_bytes());
        self.eligibility.insert(key, encode(&mapping.task_type_id)?)?;
        Ok(())
    }

    async fn revoke_eligibility(&self, mapping: &EligibilityMapping) -> Result<bool> {
        let key = pair_key(&role_prefix(&mapping.role), mapping.task_type_id.as_bytes());
        Ok(self.eligibility.remove(key)?.is_some())
    }

    async fn eligible_task_types(&self, role: &RoleId) -> Result<Vec<TaskTypeId>> {
        Self::prefixed_records(&self.eligibility, &role_prefix(role))
    }

    async fn add_member(&self, event_id: EventId, actor_id: ActorId) -> Result<()> {
        let key = pair_key(event_id.as_bytes(), actor_id.as_bytes());
        self.memberships.insert(key, encode(&Utc::now())?)?;
        Ok(())
    }

    async fn remove_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        let key = pair_key(event_id.as_bytes(), actor_id.as_bytes());
        Ok(self.memberships.remove(key)?.is_some())
    }

    async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        let key = pair_key(event_id.as_bytes(), actor_id.as_bytes());
        Ok(self.memberships.contains_key(key)?)
    }

    async fn create_instance_graph(&self, graph: &InstanceGraph) -> Result<()> {
        let instance_bytes = encode(&graph.instance)?;
        let mut task_rows = Vec::with_capacity(graph.tasks.len());
        for task in &graph.tasks {
            task_rows.push((task.id, encode(task)?));
        }

        let mut parents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for dep in &graph.dependencies {
            parents.entry(dep.task_id).or_default().push(dep.depends_on_task_id);
            children.entry(dep.depends_on_task_id).or_default().push(dep.task_id);
        }
        let parent_rows = parents
            .iter()
            .map(|(id, list)| Ok((*id, encode(list)?)))
            .collect::<Result<Vec<_>>>()?;
        let child_rows = children
            .iter()
            .map(|(id, list)| Ok((*id, encode(list)?)))
            .collect::<Result<Vec<_>>>()?;

        let instance_id = graph.instance.id;
        (&self.instances, &self.tasks, &self.parents, &self.children)
            .transaction(|(instances, tasks, parents, children)| {
                if instances.get(instance_id.as_bytes())?.is_some() {
                    return abort(EngineError::internal(format!(
                        "instance {} already exists",
                        instance_id
                    )));
                }
                instances.insert(instance_id.as_bytes().to_vec(), instance_bytes.clone())?;

                for (id, bytes) in &task_rows {
                    if tasks.get(id.as_bytes())?.is_some() {
                        return abort(EngineError::internal(format!("task {} already exists", id)));
                    }
                    tasks.insert(id.as_bytes().to_vec(), bytes.clone())?;
                }
                for (id, bytes) in &parent_rows {
                    parents.insert(id.as_bytes().to_vec(), bytes.clone())?;
                }
                for (id, bytes) in &child_rows {
                    children.insert(id.as_bytes().to_vec(), bytes.clone())?;
                }
                Ok(())
            })
            .map_err(flatten)?;

        debug!(
            instance_id = %instance_id,
            tasks = graph.tasks.len(),
            dependencies = graph.dependencies.len(),
            "Instance graph committed"
        );
        Ok(())
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Option<Instance>> {
        Self::get_record(&self.instances, id.as_bytes())
    }

    async fn list_instances(&self, event_id: Option<EventId>) -> Result<Vec<Instance>> {
        let instances: Vec<Instance> = Self::all_records(&self.instances)?;
        Ok(instances
            .into_iter()
            .filter(|instance| event_id.map_or(true, |event| instance.event_id == event))
            .collect())
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let bytes = encode(task)?;
        let previous = self
            .tasks
            .compare_and_swap(task.id.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        if previous.is_err() {
            return Err(EngineError::internal(format!("task {} already exists", task.id)));
        }
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Self::get_record(&self.tasks, id.as_bytes())
    }

    async fn list_tasks(&self, event_id: Option<EventId>) -> Result<Vec<Task>> {
        let tasks: Vec<Task> = Self::all_records(&self.tasks)?;
        Ok(tasks
            .into_iter()
            .filter(|task| event_id.map_or(true, |event| task.event_id == event))
            .collect())
    }

    async fn list_instance_tasks(&self, instance_id: InstanceId) -> Result<Vec<Task>> {
        let tasks: Vec<Task> = Self::all_records(&self.tasks)?;
        Ok(tasks
            .into_iter()
            .filter(|task| task.instance_id == Some(instance_id))
            .collect())
    }

    async fn dependencies_of(&self, id: TaskId) -> Result<Vec<TaskId>> {
        Self::id_list(&self.parents, id)
    }

    async fn dependents_of(&self, id: TaskId) -> Result<Vec<TaskId>> {
        Self::id_list(&self.children, id)
    }

    async fn commit_task_mutation(&self, mutation: &TaskMutation) -> Result<CommitReceipt> {
        let task_id = mutation.task.id;
        let expected = mutation.expected_version;

        // Sequence numbers are drawn up front so the transaction body stays a
        // pure function of the trees it reads.
        let transition_seq = self.db.generate_id()?;
        let assignment_seq = self.db.generate_id()?;
        let unlock_seqs = mutation
            .unlock_candidates
            .iter()
            .map(|_| self.db.generate_id())
            .collect::<std::result::Result<Vec<u64>, sled::Error>>()?;

        let receipt = (&self.tasks, &self.parents, &self.transitions, &self.assignments)
            .transaction(|(tasks, parents, transitions, assignments)| {
                let current: Task = match tx_get(tasks, task_id.as_bytes())? {
                    Some(task) => task,
                    None => return abort(EngineError::not_found("task", task_id)),
                };
                if current.version != expected {
                    return abort(EngineError::conflict(task_id));
                }

                let mut task = mutation.task.clone();
                task.version = expected + 1;
                tasks.insert(task_id.as_bytes().to_vec(), tx_encode(&task)?)?;

                if let Some(record) = &mutation.transition {
                    transitions.insert(history_key(task_id, transition_seq), tx_encode(record)?)?;
                }
                if let Some(audit) = &mutation.assignment {
                    assignments.insert(history_key(task_id, assignment_seq), tx_encode(audit)?)?;
                }

                let mut unlocked = Vec::new();
                let actor = match &mutation.transition {
                    Some(record) => record.actor,
                    None => task.created_by,
                };
                for (child_id, seq) in mutation.unlock_candidates.iter().zip(&unlock_seqs) {
                    let child: Task = match tx_get(tasks, child_id.as_bytes())? {
                        Some(child) => child,
                        None => continue,
                    };
                    let parent_ids: Vec<TaskId> =
                        tx_get(parents, child_id.as_bytes())?.unwrap_or_default();
                    let mut parent_states = Vec::with_capacity(parent_ids.len());
                    for parent_id in &parent_ids {
                        if *parent_id == task_id {
                            parent_states.push(task.state);
                        } else {
                            let parent: Option<Task> = tx_get(tasks, parent_id.as_bytes())?;
                            parent_states.push(parent.map_or(TaskState::Blocked, |p| p.state));
                        }
                    }
                    if !ready_to_unlock(&child, &parent_states) {
                        continue;
                    }

                    let mut released = child.next_revision();
                    released.state = TaskState::Todo;
                    tasks.insert(child_id.as_bytes().to_vec(), tx_encode(&released)?)?;
                    let record = TransitionRecord {
                        task_id: *child_id,
                        from_state: child.state,
                        to_state: TaskState::Todo,
                        actor,
                        cause: TransitionCause::Unlocked,
                        at: released.updated_at,
                    };
                    transitions.insert(history_key(*child_id, *seq), tx_encode(&record)?)?;
                    unlocked.push(*child_id);
                }

                Ok(CommitReceipt { task, unlocked })
            })
            .map_err(flatten)?;

        Ok(receipt)
    }

    async fn transitions_of(&self, id: TaskId) -> Result<Vec<TransitionRecord>> {
        Self::prefixed_records(&self.transitions, id.as_bytes())
    }

    async fn assignments_of(&self, id: TaskId) -> Result<Vec<AssignmentAudit>> {
        Self::prefixed_records(&self.assignments, id.as_bytes())
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ActorId, TemplateId};
    use crate::tasks::model::Dependency;

    fn task(state: TaskState, event: EventId) -> Task {
        Task::new(event, TaskTypeId::generate(), "task", ActorId::generate(), state)
    }

    fn instance(event: EventId) -> Instance {
        Instance {
            id: InstanceId::generate(),
            template_id: TemplateId::generate(),
            template_revision: 1,
            event_id: event,
            created_by: ActorId::generate(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_instance_graph_roundtrip() {
        let store = SledStore::temporary().unwrap();
        let event = EventId::generate();
        let inst = instance(event);
        let parent = task(TaskState::Todo, event).with_instance(inst.id);
        let child = task(TaskState::Blocked, event).with_instance(inst.id);
        let graph = InstanceGraph {
            instance: inst.clone(),
            tasks: vec![parent.clone(), child.clone()],
            dependencies: vec![Dependency {
                task_id: child.id,
                depends_on_task_id: parent.id,
            }],
        };

        store.create_instance_graph(&graph).await.unwrap();

        assert_eq!(store.get_instance(inst.id).await.unwrap(), Some(inst.clone()));
        assert_eq!(store.list_instance_tasks(inst.id).await.unwrap().len(), 2);
        assert_eq!(store.dependencies_of(child.id).await.unwrap(), vec![parent.id]);
        assert_eq!(store.dependents_of(parent.id).await.unwrap(), vec![child.id]);
        assert!(store.dependencies_of(parent.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_instance_leaves_no_rows() {
        let store = SledStore::temporary().unwrap();
        let event = EventId::generate();
        let existing = task(TaskState::Todo, event);
        store.create_task(&existing).await.unwrap();

        // Second task collides with an existing row, so nothing may land.
        let inst = instance(event);
        let fresh = task(TaskState::Todo, event).with_instance(inst.id);
        let graph = InstanceGraph {
            instance: inst.clone(),
            tasks: vec![fresh.clone(), existing.clone()],
            dependencies: vec![],
        };
        assert!(store.create_instance_graph(&graph).await.is_err());
        assert_eq!(store.get_instance(inst.id).await.unwrap(), None);
        assert_eq!(store.get_task(fresh.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let store = SledStore::temporary().unwrap();
        let original = task(TaskState::Todo, EventId::generate());
        store.create_task(&original).await.unwrap();

        let mut first = original.next_revision();
        first.state = TaskState::InProgress;
        store
            .commit_task_mutation(&TaskMutation::new(original.version, first))
            .await
            .unwrap();

        let mut second = original.next_revision();
        second.label = "renamed".into();
        let err = store
            .commit_task_mutation(&TaskMutation::new(original.version, second))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));

        let stored = store.get_task(original.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::InProgress);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_eligibility_and_membership() {
        let store = SledStore::temporary().unwrap();
        let role = RoleId::new("runner");
        let other = RoleId::new("runner2");
        let tt = TaskTypeId::generate();
        store
            .grant_eligibility(&EligibilityMapping { role: role.clone(), task_type_id: tt })
            .await
            .unwrap();

        assert_eq!(store.eligible_task_types(&role).await.unwrap(), vec![tt]);
        assert!(store.eligible_task_types(&other).await.unwrap().is_empty());

        let event = EventId::generate();
        let actor = ActorId::generate();
        assert!(!store.is_member(event, actor).await.unwrap());
        store.add_member(event, actor).await.unwrap();
        assert!(store.is_member(event, actor).await.unwrap());
        assert!(store.remove_member(event, actor).await.unwrap());
        assert!(!store.is_member(event, actor).await.unwrap());
    }
}
