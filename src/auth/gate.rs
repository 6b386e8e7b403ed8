//! Authorization predicates.
//!
//! Every predicate only reads: role table lookups are synchronous, membership
//! and eligibility go through the injected collaborators. Callers evaluate
//! the predicate before building any mutation.

use async_trait::async_trait;
use std::sync::Arc;

use super::capability::{Capability, RoleTable, TransitionPolicy};
use crate::core::errors::Result;
use crate::ids::{Actor, ActorId, EventId, RoleId, TaskTypeId};
use crate::tasks::model::Task;

/// Who belongs to which event
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool>;
}

/// Role -> task-type allow-list
#[async_trait]
pub trait EligibilityLookup: Send + Sync {
    async fn is_eligible(&self, role: &RoleId, task_type_id: TaskTypeId) -> Result<bool>;
}

pub struct AuthorizationGate {
    roles: RoleTable,
    transition_policy: TransitionPolicy,
    membership: Arc<dyn MembershipDirectory>,
    eligibility: Arc<dyn EligibilityLookup>,
}

impl AuthorizationGate {
    pub fn new(
        roles: RoleTable,
        transition_policy: TransitionPolicy,
        membership: Arc<dyn MembershipDirectory>,
        eligibility: Arc<dyn EligibilityLookup>,
    ) -> Self {
        Self {
            roles,
            transition_policy,
            membership,
            eligibility,
        }
    }

    pub fn is_admin(&self, actor: &Actor) -> bool {
        self.roles.is_admin(&actor.role)
    }

    /// Admins, or registered members of the event
    pub async fn scope(&self, actor: &Actor, event_id: EventId) -> Result<bool> {
        if self.is_admin(actor) {
            return Ok(true);
        }
        self.membership.is_member(event_id, actor.id).await
    }

    pub async fn eligible(&self, actor: &Actor, task_type_id: TaskTypeId) -> Result<bool> {
        self.eligibility.is_eligible(&actor.role, task_type_id).await
    }

    pub async fn can_pick(&self, actor: &Actor, task: &Task) -> Result<bool> {
        let (in_scope, eligible) = futures::try_join!(
            self.scope(actor, task.event_id),
            self.eligible(actor, task.task_type_id)
        )?;
        Ok(in_scope && eligible && !task.is_assigned())
    }

    pub fn can_assign(&self, actor: &Actor) -> bool {
        self.is_admin(actor) || self.roles.has(&actor.role, Capability::Assign)
    }

    pub async fn can_transition(&self, actor: &Actor, task: &Task) -> Result<bool> {
        if !self.scope(actor, task.event_id).await? {
            return Ok(false);
        }
        Ok(match self.transition_policy {
            TransitionPolicy::ScopeOnly => true,
            TransitionPolicy::AssigneeOrAdmin => {
                self.is_admin(actor) || task.assignee == Some(actor.id)
            }
        })
    }

    pub async fn can_instantiate(&self, actor: &Actor, event_id: EventId) -> Result<bool> {
        self.scope(actor, event_id).await
    }

    pub fn can_author_templates(&self, actor: &Actor) -> bool {
        self.is_admin(actor) || self.roles.has(&actor.role, Capability::AuthorTemplates)
    }

    pub fn can_delete(&self, actor: &Actor) -> bool {
        self.is_admin(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AuthorizationConfig;
    use crate::tasks::model::TaskState;
    use std::collections::HashSet;

    struct Fixed {
        members: HashSet<(EventId, ActorId)>,
        eligible: HashSet<(RoleId, TaskTypeId)>,
    }

    #[async_trait]
    impl MembershipDirectory for Fixed {
        async fn is_member(&self, event_id: EventId, actor_id: ActorId) -> Result<bool> {
            Ok(self.members.contains(&(event_id, actor_id)))
        }
    }

    #[async_trait]
    impl EligibilityLookup for Fixed {
        async fn is_eligible(&self, role: &RoleId, task_type_id: TaskTypeId) -> Result<bool> {
            Ok(self.eligible.contains(&(role.clone(), task_type_id)))
        }
    }

    struct Setup {
        gate: AuthorizationGate,
        member: Actor,
        outsider: Actor,
        admin: Actor,
        task: Task,
    }

    fn setup(policy: TransitionPolicy) -> Setup {
        let event = EventId::generate();
        let task_type = TaskTypeId::generate();
        let member = Actor::new(ActorId::generate(), "member");
        let outsider = Actor::new(ActorId::generate(), "member");
        let admin = Actor::new(ActorId::generate(), "admin");

        let fixed = Arc::new(Fixed {
            members: [(event, member.id)].into_iter().collect(),
            eligible: [(RoleId::new("member"), task_type)].into_iter().collect(),
        });
        let gate = AuthorizationGate::new(
            RoleTable::from_config(&AuthorizationConfig::default()),
            policy,
            fixed.clone(),
            fixed,
        );
        let task = Task::new(event, task_type, "Load van", admin.id, TaskState::Todo);
        Setup {
            gate,
            member,
            outsider,
            admin,
            task,
        }
    }

    #[tokio::test]
    async fn test_scope() {
        let s = setup(TransitionPolicy::ScopeOnly);
        assert!(s.gate.scope(&s.member, s.task.event_id).await.unwrap());
        assert!(s.gate.scope(&s.admin, s.task.event_id).await.unwrap());
        assert!(!s.gate.scope(&s.outsider, s.task.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_can_pick_requires_unassigned() {
        let s = setup(TransitionPolicy::ScopeOnly);
        assert!(s.gate.can_pick(&s.member, &s.task).await.unwrap());
        assert!(!s.gate.can_pick(&s.outsider, &s.task).await.unwrap());

        let mut taken = s.task.clone();
        taken.assignee = Some(s.admin.id);
        assert!(!s.gate.can_pick(&s.member, &taken).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_not_eligible_without_mapping() {
        let s = setup(TransitionPolicy::ScopeOnly);
        assert!(!s.gate.can_pick(&s.admin, &s.task).await.unwrap());
    }

    #[tokio::test]
    async fn test_transition_policy() {
        let open = setup(TransitionPolicy::ScopeOnly);
        assert!(open.gate.can_transition(&open.member, &open.task).await.unwrap());

        let strict = setup(TransitionPolicy::AssigneeOrAdmin);
        assert!(!strict.gate.can_transition(&strict.member, &strict.task).await.unwrap());
        assert!(strict.gate.can_transition(&strict.admin, &strict.task).await.unwrap());

        let mut mine = strict.task.clone();
        mine.assignee = Some(strict.member.id);
        assert!(strict.gate.can_transition(&strict.member, &mine).await.unwrap());
    }

    #[test]
    fn test_role_capabilities() {
        let s = setup(TransitionPolicy::ScopeOnly);
        let coordinator = Actor::new(ActorId::generate(), "coordinator");
        assert!(s.gate.can_assign(&s.admin));
        assert!(s.gate.can_assign(&coordinator));
        assert!(!s.gate.can_assign(&s.member));
        assert!(s.gate.can_author_templates(&coordinator));
        assert!(!s.gate.can_delete(&coordinator));
        assert!(s.gate.can_delete(&s.admin));
    }
}
