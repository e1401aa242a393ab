//! Worker-side error types

use thiserror::Error;

/// A single engine operation failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("No case is open")]
    NoCaseOpen,

    #[error("Unknown power flow method '{0}'")]
    UnknownMethod(String),

    #[error("Contingency '{0}' has not been solved")]
    NotSolved(String),

    #[error("No objects of type '{0}'")]
    NoObjects(String),

    #[error("{fields} fields but {values} values")]
    FieldMismatch { fields: usize, values: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// A task could not produce a result
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Task has no steps")]
    EmptyTask,

    #[error("Step {index} ({op}) failed: {source}")]
    StepFailed {
        index: usize,
        op: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("No result produced")]
    NoResult,
}
