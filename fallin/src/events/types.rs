//! Event types emitted by the coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::{RunState, TaskReport};

/// Everything an observer can see happen inside the coordinator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoordinatorEvent {
    /// Lifecycle transition
    StateChanged { state: RunState },
    /// A worker registered for the first time
    WorkerJoined { worker_id: String },
    /// A worker missed its heartbeat deadline
    WorkerLost { worker_id: String },
    /// A task was handed to a worker
    TaskAssigned { worker_id: String, task_id: String },
    /// A task held by a lost worker went back to the front of the queue
    TaskRecovered { worker_id: String, task_id: String },
    /// Feedback for one task was accepted
    SingleResult { report: TaskReport },
    /// Queue drained and no task in flight
    Finished { results: Vec<TaskReport> },
    /// An inbound payload was dropped
    ProtocolViolation {
        worker_id: Option<String>,
        message: String,
    },
}

impl CoordinatorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordinatorEvent::StateChanged { .. } => "StateChanged",
            CoordinatorEvent::WorkerJoined { .. } => "WorkerJoined",
            CoordinatorEvent::WorkerLost { .. } => "WorkerLost",
            CoordinatorEvent::TaskAssigned { .. } => "TaskAssigned",
            CoordinatorEvent::TaskRecovered { .. } => "TaskRecovered",
            CoordinatorEvent::SingleResult { .. } => "SingleResult",
            CoordinatorEvent::Finished { .. } => "Finished",
            CoordinatorEvent::ProtocolViolation { .. } => "ProtocolViolation",
        }
    }

    /// Worker the event is about, if any
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            CoordinatorEvent::WorkerJoined { worker_id }
            | CoordinatorEvent::WorkerLost { worker_id }
            | CoordinatorEvent::TaskAssigned { worker_id, .. }
            | CoordinatorEvent::TaskRecovered { worker_id, .. } => Some(worker_id),
            CoordinatorEvent::SingleResult { report } => Some(&report.worker_id),
            CoordinatorEvent::ProtocolViolation { worker_id, .. } => worker_id.as_deref(),
            CoordinatorEvent::StateChanged { .. } | CoordinatorEvent::Finished { .. } => None,
        }
    }
}

/// Log entry wrapper with timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: CoordinatorEvent,
}

impl EventLogEntry {
    pub fn new(event: CoordinatorEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_worker() {
        let event = CoordinatorEvent::TaskAssigned {
            worker_id: "Worker_A".to_string(),
            task_id: "t1".to_string(),
        };
        assert_eq!(event.event_type(), "TaskAssigned");
        assert_eq!(event.worker_id(), Some("Worker_A"));

        let event = CoordinatorEvent::StateChanged {
            state: RunState::Running,
        };
        assert_eq!(event.worker_id(), None);
    }

    #[test]
    fn test_event_log_entry_serialization() {
        let entry = EventLogEntry::new(CoordinatorEvent::WorkerLost {
            worker_id: "Worker_B".to_string(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("\"type\":\"WorkerLost\""));

        let parsed: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event, entry.event);
    }
}
