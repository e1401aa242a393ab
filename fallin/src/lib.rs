//! Fallin - pull-based task dispatch over publish/subscribe
//!
//! A single coordinator hands out simulation tasks to a dynamic pool of worker
//! agents. Workers announce themselves, receive one task at a time on their
//! private topic and answer with feedback; the coordinator tracks who is
//! online, who is busy and what is left, then reports when everything is done.
//!
//! # Core Concepts
//!
//! - **Pull-based**: a worker gets its next task only after reporting the last one
//! - **One task per worker**: an online worker holds at most one task at a time
//! - **Nothing lost**: tasks held by workers that go silent return to the queue
//! - **Fall-in**: a broadcast asking every worker to register again
//!
//! # Modules
//!
//! - [`channel`] - Publish/subscribe abstraction with NATS and in-memory transports
//! - [`protocol`] - Topics and wire messages
//! - [`coordinator`] - Task queue, worker registry and the coordinator task
//! - [`worker`] - Worker agent and execution engines
//! - [`dashboard`] - Registry snapshots and their consumer
//! - [`events`] - Coordinator event bus and JSONL event log
//! - [`config`] - Configuration types and loading
//! - [`taskfile`] - Task file parsing
//! - [`cli`] - Command-line interface

pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod events;
pub mod protocol;
pub mod taskfile;
pub mod worker;
