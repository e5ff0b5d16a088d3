//! Engine error types

use crate::workflow::loader::{LoadError, ValidationError};

/// Errors surfaced by the public `Engine` API
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workflow definition not found: {0}")]
    NotFound(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("No handler registered for step '{step_id}' of type '{step_type}'")]
    HandlerNotFound { step_id: String, step_type: String },

    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Timed out waiting for instance {0}")]
    WaitTimeout(String),

    #[error("Engine has been shut down")]
    ShutDown,
}

/// Failure reported by a step handler.
///
/// The display text is recorded verbatim as the step's error message.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HandlerError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// A schedule that cannot be turned into a trigger
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("Unknown schedule type '{0}'")]
    UnknownKind(String),

    #[error("Schedule type '{kind}' requires '{field}'")]
    MissingField { kind: String, field: &'static str },

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}
