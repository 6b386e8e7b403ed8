use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::config::AuthorizationConfig;
use crate::ids::RoleId;

/// A permission granted to every holder of a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Elevated role: passes every scope check
    Admin,
    /// May reassign tasks to other actors
    Assign,
    /// May create and overwrite templates
    AuthorTemplates,
}

/// Extra restriction applied to `transition` on top of scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any actor in scope may move the task
    #[default]
    ScopeOnly,
    /// Only the current assignee or an admin may move the task
    AssigneeOrAdmin,
}

/// Static role -> capability lookup. Roles missing from the table hold no
/// capabilities.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    roles: HashMap<RoleId, HashSet<Capability>>,
}

impl RoleTable {
    pub fn from_config(config: &AuthorizationConfig) -> Self {
        let roles = config
            .roles
            .iter()
            .map(|(role, caps)| (RoleId::new(role.clone()), caps.iter().copied().collect()))
            .collect();
        Self { roles }
    }

    pub fn grant(&mut self, role: RoleId, capability: Capability) {
        self.roles.entry(role).or_default().insert(capability);
    }

    pub fn has(&self, role: &RoleId, capability: Capability) -> bool {
        self.roles
            .get(role)
            .map_or(false, |caps| caps.contains(&capability))
    }

    pub fn is_admin(&self, role: &RoleId) -> bool {
        self.has(role, Capability::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = RoleTable::from_config(&AuthorizationConfig::default());
        assert!(table.is_admin(&RoleId::new("admin")));
        assert!(table.has(&RoleId::new("coordinator"), Capability::Assign));
        assert!(!table.is_admin(&RoleId::new("coordinator")));
        assert!(!table.has(&RoleId::new("member"), Capability::Assign));
        assert!(!table.has(&RoleId::new("stranger"), Capability::Assign));
    }

    #[test]
    fn test_grant() {
        let mut table = RoleTable::default();
        let role = RoleId::new("crew_lead");
        table.grant(role.clone(), Capability::Assign);
        assert!(table.has(&role, Capability::Assign));
        assert!(!table.has(&role, Capability::AuthorTemplates));
    }

    #[test]
    fn test_policy_names() {
        let policy: TransitionPolicy = serde_yaml::from_str("assignee_or_admin").unwrap();
        assert_eq!(policy, TransitionPolicy::AssigneeOrAdmin);
        assert_eq!(TransitionPolicy::default(), TransitionPolicy::ScopeOnly);
    }
}
