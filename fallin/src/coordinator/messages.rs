//! Message types for the Coordinator

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::channel::Inbound;
use crate::dashboard::DashboardSnapshot;
use crate::protocol::{Task, TaskOutcome};

use super::error::CoordinatorError;

/// Lifecycle state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
    Paused,
    Finished,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Stopped => "Stopped",
            RunState::Running => "Running",
            RunState::Paused => "Paused",
            RunState::Finished => "Finished",
        };
        write!(f, "{}", s)
    }
}

/// One processed feedback event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    #[serde(rename = "task-id")]
    pub task_id: String,
    #[serde(rename = "worker-id")]
    pub worker_id: String,
    pub outcome: TaskOutcome,
    /// Time between assignment and feedback
    #[serde(rename = "elapsed-secs")]
    pub elapsed_secs: f64,
    #[serde(rename = "completed-at")]
    pub completed_at: DateTime<Utc>,
}

/// Operator-facing status summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub state: RunState,
    #[serde(rename = "remaining-tasks")]
    pub remaining_tasks: usize,
    #[serde(rename = "in-flight")]
    pub in_flight: usize,
    pub completed: usize,
    #[serde(rename = "workers-online")]
    pub workers_online: usize,
    /// Seconds since `start()`, one decimal
    #[serde(rename = "uptime-secs")]
    pub uptime_secs: f64,
    pub connected: bool,
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status: {} | Remaining Tasks: {} | In Flight: {} | Completed: {} | Workers: {} | Uptime: {:.1}s",
            self.state, self.remaining_tasks, self.in_flight, self.completed, self.workers_online, self.uptime_secs
        )
    }
}

/// Callback invoked for every processed feedback
pub type ResultHandler = Box<dyn Fn(&TaskReport) + Send + Sync + 'static>;

/// Callback invoked once the coordinator reaches `Finished`
pub type FinishHandler = Box<dyn Fn(&[TaskReport]) + Send + Sync + 'static>;

/// Internal requests to the Coordinator task
pub enum CoordRequest {
    /// Enqueue tasks; replies with the queue length
    AddTasks {
        tasks: Vec<Task>,
        reply: oneshot::Sender<usize>,
    },

    /// Drop every queued task; replies with how many were removed
    RemoveAllTasks { reply: oneshot::Sender<usize> },

    /// Subscribe, broadcast `fallin` and begin handing out tasks
    Start {
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// Stop handing out tasks
    Pause { reply: oneshot::Sender<()> },

    /// Re-broadcast `fallin` and allow assignment again
    Resume { reply: oneshot::Sender<()> },

    /// Unsubscribe and disconnect; terminal
    Stop { reply: oneshot::Sender<()> },

    /// Get the status summary
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },

    /// Get a registry snapshot
    Snapshot {
        reply: oneshot::Sender<DashboardSnapshot>,
    },

    /// Get the results reported so far
    Results {
        reply: oneshot::Sender<Vec<TaskReport>>,
    },

    /// Register an `onSingleResult` callback
    OnSingleResult { handler: ResultHandler },

    /// Register an `onFinish` callback
    OnFinish { handler: FinishHandler },

    /// Message delivered by the channel (internal)
    Inbound(Inbound),

    /// Liveness sweep tick (internal)
    Sweep,

    /// Periodic dashboard tick (internal)
    DashboardTick,

    /// Stop the coordinator task
    Shutdown,
}

impl CoordRequest {
    fn name(&self) -> &'static str {
        match self {
            CoordRequest::AddTasks { .. } => "AddTasks",
            CoordRequest::RemoveAllTasks { .. } => "RemoveAllTasks",
            CoordRequest::Start { .. } => "Start",
            CoordRequest::Pause { .. } => "Pause",
            CoordRequest::Resume { .. } => "Resume",
            CoordRequest::Stop { .. } => "Stop",
            CoordRequest::Status { .. } => "Status",
            CoordRequest::Snapshot { .. } => "Snapshot",
            CoordRequest::Results { .. } => "Results",
            CoordRequest::OnSingleResult { .. } => "OnSingleResult",
            CoordRequest::OnFinish { .. } => "OnFinish",
            CoordRequest::Inbound(_) => "Inbound",
            CoordRequest::Sweep => "Sweep",
            CoordRequest::DashboardTick => "DashboardTick",
            CoordRequest::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Debug for CoordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordRequest::Inbound(inbound) => f.debug_tuple("Inbound").field(&inbound.topic).finish(),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Inbound;

    #[test]
    fn test_task_report_serialization() {
        let report = TaskReport {
            task_id: "ctg-1".to_string(),
            worker_id: "Worker_A".to_string(),
            outcome: TaskOutcome::Completed { value: 59.97 },
            elapsed_secs: 1.25,
            completed_at: Utc::now(),
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("task-id"));
        assert!(json.contains("\"status\":\"completed\""));

        let parsed: TaskReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_status_display() {
        let status = CoordinatorStatus {
            state: RunState::Running,
            remaining_tasks: 7,
            in_flight: 2,
            completed: 1,
            workers_online: 2,
            uptime_secs: 12.3,
            connected: true,
        };
        let line = status.to_string();
        assert!(line.contains("Running"));
        assert!(line.contains("Remaining Tasks: 7"));
        assert!(line.contains("12.3s"));
    }

    #[test]
    fn test_request_debug_names() {
        assert_eq!(format!("{:?}", CoordRequest::Sweep), "Sweep");
        let inbound = CoordRequest::Inbound(Inbound::new("feedback", "x"));
        assert_eq!(format!("{:?}", inbound), "Inbound(\"feedback\")");
    }
}
