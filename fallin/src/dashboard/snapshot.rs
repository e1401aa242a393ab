//! Serialized registry snapshot published on the `dashboard` topic

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::{RunState, WorkerRecord, WorkerStatus};
use crate::protocol::ProtocolError;

/// One worker as seen by dashboard consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    pub status: WorkerStatus,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub hardware: Vec<Value>,
    /// Id of the task in flight, if any
    #[serde(rename = "current-task", default)]
    pub current_task: Option<String>,
    #[serde(rename = "working-time-secs", default)]
    pub working_time_secs: f64,
    #[serde(rename = "task-count", default)]
    pub completed_tasks: u64,
    #[serde(default)]
    pub efficiency: Option<f64>,
}

impl From<&WorkerRecord> for WorkerView {
    fn from(record: &WorkerRecord) -> Self {
        Self {
            status: record.status,
            machine: record.machine.clone(),
            hardware: record.hardware.clone(),
            current_task: record.current_task.as_ref().map(|t| t.id.clone()),
            working_time_secs: record.working_time.as_secs_f64(),
            completed_tasks: record.completed_tasks,
            efficiency: record.efficiency,
        }
    }
}

/// Whole-registry snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub state: RunState,
    /// Tasks added minus tasks removed, over the coordinator's lifetime
    pub total_task: usize,
    /// Tasks waiting in the queue
    pub queued: usize,
    pub workers: BTreeMap<String, WorkerView>,
    #[serde(rename = "generated-at")]
    pub generated_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Progress figures derived from a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub total: usize,
    pub completed: u64,
    pub in_flight: usize,
    pub remaining: u64,
    pub online: usize,
}

impl DashboardSummary {
    pub fn from_snapshot(snapshot: &DashboardSnapshot) -> Self {
        let completed: u64 = snapshot.workers.values().map(|w| w.completed_tasks).sum();
        let in_flight = snapshot.workers.values().filter(|w| w.current_task.is_some()).count();
        let online = snapshot
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Online)
            .count();
        let remaining = (snapshot.total_task as u64)
            .saturating_sub(completed)
            .saturating_sub(in_flight as u64);

        Self {
            total: snapshot.total_task,
            completed,
            in_flight,
            remaining,
            online,
        }
    }

    /// Completed share in percent; 100 for an empty run
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}
