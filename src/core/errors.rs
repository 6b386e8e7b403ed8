use thiserror::Error;

use crate::tasks::model::TaskState;

/// The first structural problem found in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("template name cannot be empty")]
    EmptyName,

    #[error("duplicate node id '{node_id}'")]
    DuplicateNode { node_id: String },

    #[error("edge '{from}' -> '{to}' references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("node '{node_id}' references unknown task type {task_type_id}")]
    UnknownTaskType {
        node_id: String,
        task_type_id: String,
    },

    #[error("workflow contains a cycle ('{from}' -> '{to}' closes it)")]
    Cycle { from: String, to: String },
}

/// Unified error type for the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed template or graph
    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("not authorized to {action}")]
    Unauthorized { action: &'static str, actor: String },

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {task_id} is already assigned")]
    AlreadyAssigned { task_id: String, assignee: String },

    /// Lost an optimistic-concurrency race on a task row
    #[error("task {task_id} was modified concurrently")]
    Conflict { task_id: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Storage or infrastructure failure
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(action: &'static str, actor: impl ToString) -> Self {
        Self::Unauthorized {
            action,
            actor: actor.to_string(),
        }
    }

    pub fn conflict(task_id: impl ToString) -> Self {
        Self::Conflict {
            task_id: task_id.to_string(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Business-rule failures are reported in the result envelope; everything
    /// else is an infrastructure fault.
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Internal { .. } | Self::Configuration { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::AlreadyAssigned { .. } => "already_assigned",
            Self::Conflict { .. } => "conflict",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        Self::internal_with_source("storage operation failed", err)
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        Self::internal_with_source("record encoding failed", err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::internal_with_source("io operation failed", err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("invalid json: {err}"))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid yaml: {err}"))
    }
}
