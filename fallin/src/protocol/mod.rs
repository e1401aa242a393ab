//! Wire protocol spoken between the coordinator and worker agents
//!
//! | Topic | Direction | Payload |
//! |---|---|---|
//! | `registration` | worker → coordinator | [`Registration`] JSON object |
//! | `feedback` | worker → coordinator | [`Feedback`] as a `[tag, worker, task, result]` array |
//! | `heartbeat` | worker → coordinator | [`Heartbeat`] JSON object |
//! | `broadcast` | coordinator → workers | [`BroadcastCommand`] plain text |
//! | `task/<workerId>` | coordinator → one worker | [`Task`] JSON object |
//! | `dashboard` | coordinator → observers | registry snapshot JSON |

mod error;
mod messages;
mod task;
pub mod topics;

pub use error::ProtocolError;
pub use messages::{BroadcastCommand, Feedback, Heartbeat, Registration, TaskOutcome, validate_worker_id};
pub use task::{Operation, Task};
