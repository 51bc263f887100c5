use shared::domain::{BottleId, TaskKey};
use thiserror::Error;

use crate::workflow::CreationStep;

/// Requirements checked locally before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("bottle name must not be empty")]
    MissingName,
    #[error("no runner selected")]
    MissingRunner,
    #[error("no template selected")]
    MissingTemplate,
    #[error("task '{0}' is still in progress")]
    TaskInProgress(TaskKey),
    #[error("no task registered under '{0}'")]
    UnknownTask(TaskKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
    #[error("no bottle selected")]
    NoSelection,
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
}

impl ControllerError {
    pub fn backend(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Backend {
            operation,
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("{step} failed: {message}")]
    StepFailed {
        step: CreationStep,
        /// Bottle left behind by the steps that already succeeded.
        bottle_id: Option<BottleId>,
        message: String,
    },
}
