// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod logging;
    pub mod memory;
}

pub mod auth;
pub mod ids;
pub mod reference;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod workflow;

// Re-exports for convenience
pub use crate::core::config::EngineConfig;
pub use crate::core::errors::{EngineError, Result, ValidationFailure};
pub use crate::core::logging::init_tracing;
pub use ids::{Actor, ActorId, EventId, InstanceId, RoleId, TaskId, TaskTypeId, TemplateId};
pub use reference::ReferenceData;
pub use service::{ActionResult, BoundaryError, QueryResult, WorkflowService};
pub use storage::{SledStore, Store, TaskType};
pub use tasks::{Task, TaskLifecycle, TaskState};
pub use workflow::{Edge, Node, TemplateGraph, TemplateValidator};
