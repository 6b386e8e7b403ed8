#![allow(dead_code)]

pub mod hooked;

use std::collections::HashMap;
use std::sync::Arc;

use eventflow::storage::EligibilityMapping;
use eventflow::{
    Actor, ActorId, EngineConfig, EventId, SledStore, Store, Task, TaskType, WorkflowService,
};

pub struct Fixture {
    pub service: WorkflowService,
    pub store: Arc<dyn Store>,
    pub admin: Actor,
    pub member: Actor,
    pub outsider: Actor,
    pub event: EventId,
    pub task_type: TaskType,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(SledStore::temporary().unwrap()), config).await
    }

    pub async fn with_store(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let service = WorkflowService::with_store(store.clone(), &config).unwrap();

        let admin = Actor::new(ActorId::generate(), "admin");
        let member = Actor::new(ActorId::generate(), "member");
        let outsider = Actor::new(ActorId::generate(), "member");
        let event = EventId::generate();
        let task_type = TaskType::new("stagehand");

        let reference = service.reference();
        reference.put_task_type(&task_type).await.unwrap();
        reference
            .grant_eligibility(&EligibilityMapping {
                role: member.role.clone(),
                task_type_id: task_type.id,
            })
            .await
            .unwrap();
        reference.add_member(event, member.id).await.unwrap();

        Self {
            service,
            store,
            admin,
            member,
            outsider,
            event,
            task_type,
        }
    }

    /// Live tasks of the fixture event keyed by label
    pub async fn tasks_by_label(&self) -> HashMap<String, Task> {
        let listed = self
            .service
            .list_tasks(&self.admin, Some(&self.event.to_string()))
            .await
            .unwrap();
        assert!(listed.ok, "{:?}", listed.error);
        listed
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|task| (task.label.clone(), task))
            .collect()
    }

    pub async fn move_to(&self, actor: &Actor, task: &Task, state: &str) {
        let result = self
            .service
            .transition(actor, &task.id.to_string(), state)
            .await
            .unwrap();
        assert!(result.ok, "{} -> {}: {:?}", task.label, state, result.error);
    }
}
