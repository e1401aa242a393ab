//! Worker registry - what the coordinator knows about each worker

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{Registration, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Online => write!(f, "Online"),
            WorkerStatus::Offline => write!(f, "Offline"),
        }
    }
}

/// One worker's known state
///
/// Records are never removed; a worker that goes away only changes `status`.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub machine: String,
    pub hardware: Vec<Value>,
    /// At most one task is assigned at a time
    pub current_task: Option<Task>,
    pub task_started: Option<Instant>,
    pub last_seen: Instant,
    pub working_time: Duration,
    pub completed_tasks: u64,
    /// Mean seconds per completed task, two decimals
    pub efficiency: Option<f64>,
}

impl WorkerRecord {
    fn new(registration: Registration, now: Instant) -> Self {
        Self {
            worker_id: registration.id,
            status: WorkerStatus::Online,
            machine: registration.machine,
            hardware: registration.hardware,
            current_task: None,
            task_started: None,
            last_seen: now,
            working_time: Duration::ZERO,
            completed_tasks: 0,
            efficiency: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current_task.is_some()
    }

    pub fn is_idle_online(&self) -> bool {
        self.status == WorkerStatus::Online && self.current_task.is_none()
    }
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Task taken from a worker together with how long it ran
#[derive(Debug, Clone)]
pub struct FinishedAssignment {
    pub task: Task,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a worker; returns true for a first registration
    ///
    /// Refreshing keeps the current task and the running totals.
    pub fn register(&mut self, registration: Registration, now: Instant) -> bool {
        match self.workers.get_mut(&registration.id) {
            Some(record) => {
                debug!(worker_id = %record.worker_id, busy = record.is_busy(), "WorkerRegistry::register: refresh");
                record.status = WorkerStatus::Online;
                record.machine = registration.machine;
                record.hardware = registration.hardware;
                record.last_seen = now;
                false
            }
            None => {
                debug!(worker_id = %registration.id, "WorkerRegistry::register: new worker");
                self.workers
                    .insert(registration.id.clone(), WorkerRecord::new(registration, now));
                true
            }
        }
    }

    /// Record a sign of life; returns the previous status if the worker is known
    pub fn touch(&mut self, worker_id: &str, now: Instant) -> Option<WorkerStatus> {
        let record = self.workers.get_mut(worker_id)?;
        let previous = record.status;
        record.last_seen = now;
        record.status = WorkerStatus::Online;
        Some(previous)
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    /// Hand a task to a worker; gives the task back if the worker cannot take it
    pub fn assign(&mut self, worker_id: &str, task: Task, now: Instant) -> Result<(), Task> {
        match self.workers.get_mut(worker_id) {
            Some(record) if record.is_idle_online() => {
                record.current_task = Some(task);
                record.task_started = Some(now);
                Ok(())
            }
            _ => Err(task),
        }
    }

    /// Clear a worker's task without crediting it
    pub fn revoke(&mut self, worker_id: &str) -> Option<Task> {
        let record = self.workers.get_mut(worker_id)?;
        record.task_started = None;
        record.current_task.take()
    }

    /// Clear a worker's task and credit the elapsed time to its totals
    pub fn complete(&mut self, worker_id: &str, now: Instant) -> Option<FinishedAssignment> {
        let record = self.workers.get_mut(worker_id)?;
        let task = record.current_task.take()?;
        let elapsed = record
            .task_started
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();

        record.working_time += elapsed;
        record.completed_tasks += 1;
        record.efficiency = Some(round2(
            record.working_time.as_secs_f64() / record.completed_tasks as f64,
        ));
        record.last_seen = now;

        Some(FinishedAssignment { task, elapsed })
    }

    /// Mark every online worker silent for longer than `timeout` as offline
    ///
    /// Returns the ids that changed, sorted.
    pub fn mark_stale(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut lost: Vec<String> = self
            .workers
            .values_mut()
            .filter(|r| r.status == WorkerStatus::Online && now.saturating_duration_since(r.last_seen) > timeout)
            .map(|r| {
                r.status = WorkerStatus::Offline;
                r.worker_id.clone()
            })
            .collect();
        lost.sort();
        lost
    }

    /// Take the tasks held by offline workers, sorted by worker id
    pub fn take_lost_work(&mut self) -> Vec<(String, Task)> {
        let mut lost: Vec<(String, Task)> = self
            .workers
            .values_mut()
            .filter(|r| r.status == WorkerStatus::Offline)
            .filter_map(|r| {
                r.task_started = None;
                r.current_task.take().map(|task| (r.worker_id.clone(), task))
            })
            .collect();
        lost.sort_by(|a, b| a.0.cmp(&b.0));
        lost
    }

    /// Online workers without a task, sorted
    pub fn idle_online_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .values()
            .filter(|r| r.is_idle_online())
            .map(|r| r.worker_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn online_count(&self) -> usize {
        self.workers.values().filter(|r| r.status == WorkerStatus::Online).count()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.values().filter(|r| r.is_busy()).count()
    }

    pub fn any_busy(&self) -> bool {
        self.workers.values().any(WorkerRecord::is_busy)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.workers.values()
    }
}
