//! Cached reference data: task types, role eligibility and templates.
//!
//! Entries live for the configured TTL. Every write path below invalidates
//! the matching cache entry after the store write succeeds, and reads only
//! fill the cache when no invalidation ran during their store read.
//! Membership is not cached.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{EligibilityLookup, MembershipDirectory};
use crate::core::errors::{EngineError, Result};
use crate::core::memory::{CacheConfig, CacheStats, TtlCache};
use crate::ids::{Actor, ActorId, EventId, RoleId, TaskTypeId, TemplateId};
use crate::storage::{EligibilityMapping, Store, TaskType};
use crate::tasks::model::Presence;
use crate::workflow::template::TemplateRecord;
use crate::workflow::validator::TaskTypeLookup;

pub struct ReferenceData {
    store: Arc<dyn Store>,
    task_types: TtlCache<TaskTypeId, Option<TaskType>>,
    eligibility: TtlCache<RoleId, Arc<Vec<TaskTypeId>>>,
    templates: TtlCache<TemplateId, TemplateRecord>,
}

impl ReferenceData {
    pub fn new(store: Arc<dyn Store>, config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            store,
            task_types: TtlCache::new("task_types", config)?,
            eligibility: TtlCache::new("eligibility", config)?,
            templates: TtlCache::new("templates", config)?,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // Task types

    pub async fn put_task_type(&self, task_type: &TaskType) -> Result<()> {
        self.store.put_task_type(task_type).await?;
        self.task_types.invalidate(&task_type.id);
        info!(task_type_id = %task_type.id, name = %task_type.name, "Task type saved");
        Ok(())
    }

    /// Soft-delete a task type. Templates referencing it stop validating.
    pub async fn retire_task_type(&self, actor: &Actor, id: TaskTypeId) -> Result<()> {
        let mut task_type = self
            .store
            .get_task_type(id)
            .await?
            .ok_or_else(|| EngineError::not_found("task type", id))?;
        task_type.presence = Presence::Deleted {
            at: chrono::Utc::now(),
            by: actor.id,
        };
        self.store.put_task_type(&task_type).await?;
        self.task_types.invalidate(&id);
        info!(task_type_id = %id, actor = %actor.id, "Task type retired");
        Ok(())
    }

    /// Live task type, cached
    pub async fn task_type(&self, id: TaskTypeId) -> Result<Option<TaskType>> {
        if let Some(cached) = self.task_types.get(&id) {
            return Ok(cached);
        }
        let generation = self.task_types.generation();
        let live = self.fetch_task_type(id).await?;
        self.task_types.insert_if_current(id, live.clone(), generation);
        Ok(live)
    }

    async fn fetch_task_type(&self, id: TaskTypeId) -> Result<Option<TaskType>> {
        Ok(self
            .store
            .get_task_type(id)
            .await?
            .filter(|task_type| task_type.presence.is_active()))
    }

    // Eligibility

    pub async fn grant_eligibility(&self, mapping: &EligibilityMapping) -> Result<()> {
        self.store.grant_eligibility(mapping).await?;
        self.eligibility.invalidate(&mapping.role);
        info!(role = %mapping.role, task_type_id = %mapping.task_type_id, "Eligibility granted");
        Ok(())
    }

    pub async fn revoke_eligibility(&self, mapping: &EligibilityMapping) -> Result<bool> {
        let removed = self.store.revoke_eligibility(mapping).await?;
        self.eligibility.invalidate(&mapping.role);
        info!(role = %mapping.role, task_type_id = %mapping.task_type_id, removed, "Eligibility revoked");
        Ok(removed)
    }

    async fn eligible_task_types(&self, role: &RoleId) -> Result<Arc<Vec<TaskTypeId>>> {
        if let Some(cached) = self.eligibility.get(role) {
            return Ok(cached);
        }
        let generation = self.eligibility.generation();
        let types = Arc::new(self.store.eligible_task_types(role).await?);
        self.eligibility
            .insert_if_current(role.clone(), types.clone(), generation);
        Ok(types)
    }

    // Membership

    pub async fn add_member(&self, event_id: EventId, actor_id: ActorId) -> Result<()> {
        self.store.add_member(event_id, actor_id).await?;
        debug!(event_id = %event_id, actor_id = %actor_id, "Member added");
        Ok(())
    }

    pub async fn remove_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        self.store.remove_member(event_id, actor_id).await
    }

    // Templates

    pub async fn save_template(&self, template: &TemplateRecord) -> Result<()> {
        self.store.put_template(template).await?;
        self.templates.invalidate(&template.id);
        Ok(())
    }

    pub async fn update_template(&self, template: &TemplateRecord) -> Result<()> {
        self.save_template(template).await
    }

    pub async fn template(&self, id: TemplateId) -> Result<Option<TemplateRecord>> {
        if let Some(cached) = self.templates.get(&id) {
            return Ok(Some(cached));
        }
        let generation = self.templates.generation();
        let template = self.store.get_template(id).await?;
        if let Some(found) = &template {
            self.templates.insert_if_current(id, found.clone(), generation);
        }
        Ok(template)
    }

    pub fn invalidate_all(&self) {
        self.task_types.invalidate_all();
        self.eligibility.invalidate_all();
        self.templates.invalidate_all();
    }

    /// (task types, eligibility, templates)
    pub fn cache_stats(&self) -> (CacheStats, CacheStats, CacheStats) {
        (
            self.task_types.stats(),
            self.eligibility.stats(),
            self.templates.stats(),
        )
    }
}

#[async_trait]
impl TaskTypeLookup for ReferenceData {
    async fn task_type_exists(&self, id: TaskTypeId) -> Result<bool> {
        Ok(self.task_type(id).await?.is_some())
    }

    async fn task_type_exists_fresh(&self, id: TaskTypeId) -> Result<bool> {
        Ok(self.fetch_task_type(id).await?.is_some())
    }
}

#[async_trait]
impl EligibilityLookup for ReferenceData {
    async fn is_eligible(&self, role: &RoleId, task_type_id: TaskTypeId) -> Result<bool> {
        Ok(self.eligible_task_types(role).await?.contains(&task_type_id))
    }
}

#[async_trait]
impl MembershipDirectory for ReferenceData {
    async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
        self.store.is_member(event_id, actor_id).await
    }
}
