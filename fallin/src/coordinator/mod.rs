//! Coordinator (manager) for distributed task dispatch
//!
//! The coordinator owns the task queue and the worker registry. It hands one
//! task at a time to each registered worker, recovers the work of workers that
//! stop sending heartbeats, and reports `Finished` once the queue is empty and
//! no task is in flight.
//!
//! - [`CoordinatorState`]: the synchronous state machine
//! - [`Coordinator`]: the actor that owns the state and talks to the channel
//! - [`CoordinatorHandle`]: the operator surface (`add_tasks`, `start`, `pause`, ...)

mod config;
mod core;
mod error;
mod handle;
mod messages;
mod queue;
mod registry;
mod state;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use error::CoordinatorError;
pub use handle::CoordinatorHandle;
pub use messages::{CoordRequest, CoordinatorStatus, FinishHandler, ResultHandler, RunState, TaskReport};
pub use queue::TaskQueue;
pub use registry::{FinishedAssignment, WorkerRecord, WorkerRegistry, WorkerStatus, round2};
pub use state::{CoordinatorState, Effect};
