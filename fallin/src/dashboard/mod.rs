//! Dashboard snapshots and their consumer
//!
//! The coordinator publishes a [`DashboardSnapshot`] on the `dashboard` topic
//! after every processed feedback (and optionally on a timer). Consumers derive
//! progress with [`DashboardSummary`]; the coordinator never waits for them.

mod consumer;
mod snapshot;

pub use consumer::{DashboardConsumer, render};
pub use snapshot::{DashboardSnapshot, DashboardSummary, WorkerView};
