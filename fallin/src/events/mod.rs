//! Coordinator event stream
//!
//! Every assignment, recovery, result and lifecycle transition is emitted on an
//! [`EventBus`]. Observers (the CLI progress output, the JSONL [`EventLogger`],
//! tests) subscribe; the coordinator never waits on them.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use logger::{EventLogger, read_events, spawn_event_logger};
pub use types::{CoordinatorEvent, EventLogEntry};
