//! Worker agent
//!
//! A worker subscribes to `broadcast` and its private `task/<id>` topic,
//! registers, then executes each assigned [`Task`](crate::protocol::Task)
//! step by step through an [`ExecutionEngine`]. Every task is answered with
//! feedback: a value on success, a failure message otherwise.

mod agent;
mod config;
mod engine;
mod error;
mod host;
mod interpreter;

pub use agent::{WorkerAgent, WorkerExit};
pub use config::{WorkerConfig, generate_worker_id};
pub use engine::{ExecutionEngine, SimulatedEngine};
pub use error::{EngineError, ExecutionError};
pub use host::HostInfo;
pub use interpreter::Interpreter;
