//! Topic names; these are part of the wire contract

pub const REGISTRATION: &str = "registration";
pub const FEEDBACK: &str = "feedback";
pub const HEARTBEAT: &str = "heartbeat";
pub const BROADCAST: &str = "broadcast";
pub const DASHBOARD: &str = "dashboard";

const TASK_PREFIX: &str = "task/";

/// Private task topic of one worker
pub fn task_topic(worker_id: &str) -> String {
    format!("{}{}", TASK_PREFIX, worker_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_topic() {
        assert_eq!(task_topic("Worker_A1B2C3"), "task/Worker_A1B2C3");
        assert!(crate::channel::topic_matches("task/+", &task_topic("Worker_A1B2C3")));
    }
}
