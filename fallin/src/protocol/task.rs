//! Task payloads

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

fn generate_task_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// One unit of work: an ordered list of engine operations
///
/// Payloads are immutable once queued; a task recovered from a lost worker is
/// re-queued with the same id and steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "generate_task_id")]
    pub id: String,
    pub steps: Vec<Operation>,
}

impl Task {
    /// Create a task with a generated id
    pub fn new(steps: Vec<Operation>) -> Self {
        Self {
            id: generate_task_id(),
            steps,
        }
    }

    /// Create a task with an explicit id
    pub fn with_id(id: impl Into<String>, steps: Vec<Operation>) -> Self {
        Self { id: id.into(), steps }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let task: Self = serde_json::from_slice(payload)?;
        if task.id.trim().is_empty() {
            return Err(ProtocolError::InvalidTaskId(task.id));
        }
        Ok(task)
    }
}

/// Operations understood by the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum Operation {
    /// Load a case file into the engine
    OpenCase { path: String },
    /// Run a raw engine script command
    RunScript { command: String },
    /// Create objects of a type with the given field values
    CreateData {
        object_type: String,
        fields: Vec<String>,
        values: Vec<String>,
    },
    /// Change parameters of existing objects
    ChangeParameters {
        object_type: String,
        fields: Vec<String>,
        values: Vec<String>,
    },
    /// Solve the steady-state power flow; yields the largest bus mismatch
    SolvePowerFlow {
        #[serde(default = "default_power_flow_method")]
        method: String,
    },
    /// Run a transient stability contingency
    TsSolve { contingency: String },
    /// Read back the final sample of a solved contingency's time series
    TsGetResults { contingency: String, fields: Vec<String> },
    /// Delete all objects of a type
    Delete { object_type: String },
    /// Save the case, optionally under a new path
    SaveCase {
        #[serde(default)]
        path: Option<String>,
    },
}

fn default_power_flow_method() -> String {
    "RECTNEWT".to_string()
}

impl Operation {
    /// Wire name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Operation::OpenCase { .. } => "open-case",
            Operation::RunScript { .. } => "run-script",
            Operation::CreateData { .. } => "create-data",
            Operation::ChangeParameters { .. } => "change-parameters",
            Operation::SolvePowerFlow { .. } => "solve-power-flow",
            Operation::TsSolve { .. } => "ts-solve",
            Operation::TsGetResults { .. } => "ts-get-results",
            Operation::Delete { .. } => "delete",
            Operation::SaveCase { .. } => "save-case",
        }
    }
}
