//! Coordinator error types

use thiserror::Error;

/// Rejected coordinator operations and protocol violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Feedback from unknown worker {worker_id}")]
    UnknownWorker { worker_id: String },

    #[error("Worker {worker_id} reported task {task_id} but holds no task")]
    NoTaskInFlight { worker_id: String, task_id: String },

    #[error("Worker {worker_id} reported task {reported} but holds task {assigned}")]
    TaskMismatch {
        worker_id: String,
        assigned: String,
        reported: String,
    },

    #[error("Coordinator was stopped; create a new one to run again")]
    Terminated,

    #[error("Channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_mismatch_message() {
        let err = CoordinatorError::TaskMismatch {
            worker_id: "Worker_A".to_string(),
            assigned: "t1".to_string(),
            reported: "t2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Worker_A"));
        assert!(msg.contains("t1"));
        assert!(msg.contains("t2"));
    }
}
