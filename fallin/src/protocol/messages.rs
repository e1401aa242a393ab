//! Control-plane messages: registration, feedback, heartbeat, broadcast

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProtocolError;

const MAX_WORKER_ID_LEN: usize = 64;

/// Worker ids appear in topic names, so they are restricted to `[A-Za-z0-9_-]`
pub fn validate_worker_id(id: &str) -> Result<(), ProtocolError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_WORKER_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidWorkerId(id.to_string()))
    }
}

/// Sent by a worker on startup and whenever it hears `fallin`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub hardware: Vec<Value>,
}

impl Registration {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let registration: Self = serde_json::from_slice(payload)?;
        validate_worker_id(&registration.id)?;
        Ok(registration)
    }
}

/// Liveness ping published periodically by each worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
}

impl Heartbeat {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let heartbeat: Self = serde_json::from_slice(payload)?;
        validate_worker_id(&heartbeat.id)?;
        Ok(heartbeat)
    }
}

/// Terminal result of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TaskOutcome {
    Completed { value: f64 },
    Failed { error: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            TaskOutcome::Completed { value } => Some(*value),
            TaskOutcome::Failed { .. } => None,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed { value } => write!(f, "{}", value),
            TaskOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

const TAG_DONE: &str = "done";
const TAG_FAILED: &str = "failed";

/// Tuple encoding on the wire: `["done", workerId, taskId, 59.98]`
#[derive(Serialize, Deserialize)]
struct FeedbackFrame(String, String, String, Value);

/// A worker's report for a finished task
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub worker_id: String,
    pub task_id: String,
    pub outcome: TaskOutcome,
}

impl Feedback {
    pub fn new(worker_id: impl Into<String>, task_id: impl Into<String>, outcome: TaskOutcome) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            outcome,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let (tag, result) = match &self.outcome {
            TaskOutcome::Completed { value } => (TAG_DONE, serde_json::to_value(value)?),
            TaskOutcome::Failed { error } => (TAG_FAILED, Value::String(error.clone())),
        };
        let frame = FeedbackFrame(tag.to_string(), self.worker_id.clone(), self.task_id.clone(), result);
        Ok(Bytes::from(serde_json::to_vec(&frame)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let FeedbackFrame(tag, worker_id, task_id, result) = serde_json::from_slice(payload)?;
        validate_worker_id(&worker_id)?;
        if task_id.trim().is_empty() {
            return Err(ProtocolError::InvalidTaskId(task_id));
        }

        let outcome = match tag.as_str() {
            TAG_DONE => {
                let value = result
                    .as_f64()
                    .ok_or_else(|| ProtocolError::InvalidResult(result.to_string()))?;
                TaskOutcome::Completed { value }
            }
            TAG_FAILED => TaskOutcome::Failed {
                error: match result {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            },
            _ => return Err(ProtocolError::UnknownFeedbackTag(tag)),
        };

        Ok(Self {
            worker_id,
            task_id,
            outcome,
        })
    }
}

/// Plain-text control token on the `broadcast` topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastCommand {
    /// Invitation for every worker to (re-)register
    FallIn,
    /// Ask one worker to leave
    Disconnect(String),
}

impl BroadcastCommand {
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        std::str::from_utf8(payload)?.parse()
    }
}

impl fmt::Display for BroadcastCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastCommand::FallIn => write!(f, "fallin"),
            BroadcastCommand::Disconnect(worker_id) => write!(f, "disconnect {}", worker_id),
        }
    }
}

impl FromStr for BroadcastCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "fallin" {
            return Ok(BroadcastCommand::FallIn);
        }
        match s.split_once(' ') {
            Some(("disconnect", worker_id)) => {
                let worker_id = worker_id.trim();
                validate_worker_id(worker_id)?;
                Ok(BroadcastCommand::Disconnect(worker_id.to_string()))
            }
            _ => Err(ProtocolError::UnknownBroadcast(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_wire_format() {
        let registration = Registration {
            id: "Worker_A1B2C3".to_string(),
            machine: "node-7 (Linux 6.1)".to_string(),
            hardware: vec![json!(8), json!(3600), json!(1024)],
        };

        let bytes = registration.encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], "Worker_A1B2C3");
        assert_eq!(value["hardware"], json!([8, 3600, 1024]));

        assert_eq!(Registration::decode(&bytes).unwrap(), registration);
    }

    #[test]
    fn test_registration_without_machine() {
        let registration = Registration::decode(br#"{"id":"Worker_X","hardware":[4]}"#).unwrap();
        assert_eq!(registration.machine, "");
        assert_eq!(registration.hardware, vec![json!(4)]);
    }

    #[test]
    fn test_registration_rejects_bad_id() {
        assert!(matches!(
            Registration::decode(br#"{"id":"task/evil"}"#),
            Err(ProtocolError::InvalidWorkerId(_))
        ));
        assert!(matches!(
            Registration::decode(br#"{"id":""}"#),
            Err(ProtocolError::InvalidWorkerId(_))
        ));
        assert!(matches!(Registration::decode(b"not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_feedback_done_is_tuple_encoded() {
        let feedback = Feedback::new("Worker_A", "task-1", TaskOutcome::Completed { value: 59.98 });
        let bytes = feedback.encode().unwrap();
        assert_eq!(&bytes[..], br#"["done","Worker_A","task-1",59.98]"#);
        assert_eq!(Feedback::decode(&bytes).unwrap(), feedback);
    }

    #[test]
    fn test_feedback_failed_carries_error() {
        let feedback = Feedback::new(
            "Worker_A",
            "task-2",
            TaskOutcome::Failed {
                error: "step 2 (ts-solve) failed".to_string(),
            },
        );
        let bytes = feedback.encode().unwrap();
        let decoded = Feedback::decode(&bytes).unwrap();
        assert!(!decoded.outcome.is_success());
        assert_eq!(decoded, feedback);
    }

    #[test]
    fn test_feedback_accepts_integer_result() {
        let decoded = Feedback::decode(br#"["done","Worker_A","120",60]"#).unwrap();
        assert_eq!(decoded.outcome.value(), Some(60.0));
        assert_eq!(decoded.task_id, "120");
    }

    #[test]
    fn test_feedback_rejects_malformed() {
        assert!(matches!(
            Feedback::decode(br#"["done","Worker_A","t1","abc"]"#),
            Err(ProtocolError::InvalidResult(_))
        ));
        assert!(matches!(
            Feedback::decode(br#"["maybe","Worker_A","t1",1.0]"#),
            Err(ProtocolError::UnknownFeedbackTag(_))
        ));
        assert!(matches!(
            Feedback::decode(br#"["done","Worker_A"]"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            Feedback::decode(br#"["done","Worker_A"," ",1.0]"#),
            Err(ProtocolError::InvalidTaskId(_))
        ));
    }

    #[test]
    fn test_broadcast_commands() {
        assert_eq!(BroadcastCommand::FallIn.to_string(), "fallin");
        assert_eq!(
            BroadcastCommand::Disconnect("Worker_A".to_string()).to_string(),
            "disconnect Worker_A"
        );
        assert_eq!(BroadcastCommand::decode(b"fallin").unwrap(), BroadcastCommand::FallIn);
        assert_eq!(
            BroadcastCommand::decode(b"disconnect Worker_A\n").unwrap(),
            BroadcastCommand::Disconnect("Worker_A".to_string())
        );
        assert!(BroadcastCommand::decode(b"heartbeat").is_err());
        assert!(BroadcastCommand::decode(b"disconnect ").is_err());
    }

    #[test]
    fn test_heartbeat_decode() {
        let heartbeat = Heartbeat::decode(br#"{"id":"Worker_A"}"#).unwrap();
        assert_eq!(heartbeat.id, "Worker_A");
        assert!(Heartbeat::decode(br#"{"id":"a b"}"#).is_err());
    }
}
