pub mod capability;
pub mod gate;

pub use capability::{Capability, RoleTable, TransitionPolicy};
pub use gate::{AuthorizationGate, EligibilityLookup, MembershipDirectory};
