pub mod model;
pub mod state_machine;

pub use model::{
    AssignmentAudit, Dependency, Instance, Presence, Task, TaskState, TransitionCause,
    TransitionRecord,
};
pub use state_machine::TaskLifecycle;
