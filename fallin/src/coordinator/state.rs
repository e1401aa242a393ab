//! Coordinator state machine
//!
//! [`CoordinatorState`] owns the queue, the registry and the results. It never
//! touches the network: every operation takes the current time and returns the
//! [`Effect`]s the caller must carry out, in order. The actor in `core.rs` is
//! its only owner, which serializes every read-modify-write.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dashboard::{DashboardSnapshot, WorkerView};
use crate::events::CoordinatorEvent;
use crate::protocol::{BroadcastCommand, Feedback, Heartbeat, Registration, Task};

use super::config::CoordinatorConfig;
use super::error::CoordinatorError;
use super::messages::{CoordinatorStatus, RunState, TaskReport};
use super::queue::TaskQueue;
use super::registry::{WorkerRecord, WorkerRegistry, WorkerStatus};

/// Side effect requested by a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish `task` on `task/<worker_id>` with at-least-once delivery
    AssignTask { worker_id: String, task: Task },
    /// Publish on the `broadcast` topic
    Broadcast(BroadcastCommand),
    /// Emit on the event bus (and to matching callbacks)
    Notify(CoordinatorEvent),
    /// Publish a fresh snapshot on the `dashboard` topic
    PublishDashboard,
    /// Disconnect from the channel
    Disconnect,
}

pub struct CoordinatorState {
    config: CoordinatorConfig,
    run_state: RunState,
    /// Set by `stop()`; nothing restarts a stopped coordinator
    terminated: bool,
    queue: TaskQueue,
    registry: WorkerRegistry,
    results: Vec<TaskReport>,
    total_task: usize,
    started_at: Option<Instant>,
}

impl CoordinatorState {
    pub fn new(config: CoordinatorConfig) -> Self {
        debug!(?config, "CoordinatorState::new: called");
        Self {
            config,
            run_state: RunState::Stopped,
            terminated: false,
            queue: TaskQueue::new(),
            registry: WorkerRegistry::new(),
            results: Vec::new(),
            total_task: 0,
            started_at: None,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Ids of queued tasks, front first
    pub fn queued_ids(&self) -> Vec<String> {
        self.queue.iter().map(|t| t.id.clone()).collect()
    }

    pub fn results(&self) -> &[TaskReport] {
        &self.results
    }

    pub fn total_task(&self) -> usize {
        self.total_task
    }

    pub fn worker(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.registry.get(worker_id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.registry.iter()
    }

    /// Queue empty and no worker holds a task
    pub fn is_all_done(&self) -> bool {
        self.queue.is_empty() && !self.registry.any_busy()
    }

    /// Enqueue tasks at the back
    ///
    /// A finished coordinator goes back to running; a running one hands the new
    /// work to idle workers straight away. Tasks with a blank id are dropped:
    /// feedback for them could never be matched.
    pub fn add_tasks(&mut self, tasks: Vec<Task>, now: Instant) -> Vec<Effect> {
        debug!(count = tasks.len(), "CoordinatorState::add_tasks: called");
        let mut effects = Vec::new();
        if self.terminated {
            return effects;
        }

        let tasks: Vec<Task> = tasks
            .into_iter()
            .filter(|task| {
                let blank = task.id.trim().is_empty();
                if blank {
                    warn!(steps = task.steps.len(), "Dropping task with blank id");
                }
                !blank
            })
            .collect();
        if tasks.is_empty() {
            return effects;
        }

        self.total_task += tasks.len();
        self.queue.extend(tasks);

        if self.run_state == RunState::Finished {
            self.transition(RunState::Running, &mut effects);
        }
        if self.run_state == RunState::Running {
            self.dispatch_idle(now, &mut effects);
        }
        effects
    }

    /// Drop every queued task; tasks already in flight are untouched
    pub fn remove_all_tasks(&mut self) -> (usize, Vec<Effect>) {
        let removed = self.queue.clear();
        self.total_task = self.total_task.saturating_sub(removed);
        debug!(removed, "CoordinatorState::remove_all_tasks: called");

        let mut effects = Vec::new();
        self.check_completion(&mut effects);
        (removed, effects)
    }

    pub fn start(&mut self, now: Instant) -> Result<Vec<Effect>, CoordinatorError> {
        debug!(state = %self.run_state, "CoordinatorState::start: called");
        if self.terminated {
            return Err(CoordinatorError::Terminated);
        }

        let mut effects = Vec::new();
        match self.run_state {
            RunState::Stopped => {
                self.started_at = Some(now);
                self.transition(RunState::Running, &mut effects);
                effects.push(Effect::Broadcast(BroadcastCommand::FallIn));
                self.dispatch_idle(now, &mut effects);
            }
            RunState::Paused => return Ok(self.resume(now)),
            RunState::Running | RunState::Finished => {}
        }
        Ok(effects)
    }

    pub fn pause(&mut self) -> Vec<Effect> {
        debug!(state = %self.run_state, "CoordinatorState::pause: called");
        let mut effects = Vec::new();
        if self.run_state == RunState::Running {
            self.transition(RunState::Paused, &mut effects);
        }
        effects
    }

    /// Re-broadcast `fallin` and hand work to idle workers again
    pub fn resume(&mut self, now: Instant) -> Vec<Effect> {
        debug!(state = %self.run_state, "CoordinatorState::resume: called");
        let mut effects = Vec::new();
        if self.run_state != RunState::Paused {
            return effects;
        }

        self.transition(RunState::Running, &mut effects);
        effects.push(Effect::Broadcast(BroadcastCommand::FallIn));
        self.dispatch_idle(now, &mut effects);
        self.check_completion(&mut effects);
        effects
    }

    /// Terminal: tasks in flight are abandoned
    pub fn stop(&mut self) -> Vec<Effect> {
        debug!(state = %self.run_state, "CoordinatorState::stop: called");
        let mut effects = Vec::new();
        if self.terminated {
            return effects;
        }
        self.terminated = true;
        if self.run_state != RunState::Stopped {
            self.transition(RunState::Stopped, &mut effects);
        }
        effects.push(Effect::Disconnect);
        effects
    }

    pub fn on_registration(&mut self, registration: Registration, now: Instant) -> Vec<Effect> {
        debug!(worker_id = %registration.id, "CoordinatorState::on_registration: called");
        let mut effects = Vec::new();
        if self.terminated {
            return effects;
        }

        let worker_id = registration.id.clone();
        if self.registry.register(registration, now) {
            info!(%worker_id, "Worker joined");
            effects.push(Effect::Notify(CoordinatorEvent::WorkerJoined {
                worker_id: worker_id.clone(),
            }));
        }
        if self.run_state == RunState::Running {
            self.assign_next(&worker_id, now, &mut effects);
        }
        effects
    }

    /// Account for a finished task and give the worker its next one
    ///
    /// Feedback that does not match the worker's recorded task changes no
    /// counters and is returned as an error for the caller to log.
    pub fn on_feedback(&mut self, feedback: Feedback, now: Instant) -> Result<Vec<Effect>, CoordinatorError> {
        debug!(worker_id = %feedback.worker_id, task_id = %feedback.task_id, "CoordinatorState::on_feedback: called");
        let mut effects = Vec::new();
        if self.terminated {
            return Ok(effects);
        }

        if self.registry.touch(&feedback.worker_id, now).is_none() {
            return Err(CoordinatorError::UnknownWorker {
                worker_id: feedback.worker_id,
            });
        }
        let assigned = self
            .registry
            .get(&feedback.worker_id)
            .and_then(|r| r.current_task.as_ref())
            .map(|t| t.id.clone());
        match assigned {
            None => {
                return Err(CoordinatorError::NoTaskInFlight {
                    worker_id: feedback.worker_id,
                    task_id: feedback.task_id,
                });
            }
            Some(assigned) if assigned != feedback.task_id => {
                return Err(CoordinatorError::TaskMismatch {
                    worker_id: feedback.worker_id,
                    assigned,
                    reported: feedback.task_id,
                });
            }
            Some(_) => {}
        }

        let Some(finished) = self.registry.complete(&feedback.worker_id, now) else {
            return Err(CoordinatorError::NoTaskInFlight {
                worker_id: feedback.worker_id,
                task_id: feedback.task_id,
            });
        };

        let report = TaskReport {
            task_id: finished.task.id,
            worker_id: feedback.worker_id.clone(),
            outcome: feedback.outcome,
            elapsed_secs: finished.elapsed.as_secs_f64(),
            completed_at: Utc::now(),
        };
        info!(
            worker_id = %report.worker_id,
            task_id = %report.task_id,
            outcome = %report.outcome,
            elapsed_secs = report.elapsed_secs,
            "Task reported"
        );
        self.results.push(report.clone());
        effects.push(Effect::Notify(CoordinatorEvent::SingleResult { report }));
        if self.config.publish_dashboard {
            effects.push(Effect::PublishDashboard);
        }

        if self.run_state == RunState::Running {
            self.assign_next(&feedback.worker_id, now, &mut effects);
        }
        Ok(effects)
    }

    /// Refresh liveness; an unknown worker is invited to register again
    pub fn on_heartbeat(&mut self, heartbeat: Heartbeat, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.terminated {
            return effects;
        }

        match self.registry.touch(&heartbeat.id, now) {
            None => {
                debug!(worker_id = %heartbeat.id, "Heartbeat from unknown worker, inviting fall-in");
                if self.run_state != RunState::Stopped {
                    effects.push(Effect::Broadcast(BroadcastCommand::FallIn));
                }
            }
            Some(WorkerStatus::Offline) => {
                info!(worker_id = %heartbeat.id, "Worker back online");
                if self.run_state == RunState::Running {
                    self.assign_next(&heartbeat.id, now, &mut effects);
                }
            }
            Some(WorkerStatus::Online) => {}
        }
        effects
    }

    /// Mark silent workers offline, recover their tasks and redistribute work
    pub fn sweep(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.terminated || self.run_state == RunState::Stopped {
            return effects;
        }

        for worker_id in self.registry.mark_stale(now, self.config.heartbeat_timeout()) {
            warn!(%worker_id, "Worker missed heartbeat deadline, marking offline");
            effects.push(Effect::Notify(CoordinatorEvent::WorkerLost { worker_id }));
        }
        self.reconcile_lost_work(&mut effects);

        if self.run_state == RunState::Running {
            self.dispatch_idle(now, &mut effects);
        }
        effects
    }

    /// Give the next queued task to `worker_id`
    ///
    /// Only an online worker without a task can receive one. When nothing is
    /// queued, lost work is reconciled first; if that recovered a task the pop is
    /// retried, otherwise completion is checked. Returns the assigned task id.
    pub fn assign_next(&mut self, worker_id: &str, now: Instant, effects: &mut Vec<Effect>) -> Option<String> {
        if self.run_state != RunState::Running {
            return None;
        }
        match self.registry.get(worker_id) {
            Some(record) if record.is_idle_online() => {}
            Some(record) => {
                debug!(%worker_id, status = %record.status, busy = record.is_busy(), "assign_next: worker cannot take a task");
                return None;
            }
            None => return None,
        }

        loop {
            if let Some(task) = self.queue.pop_front() {
                let task_id = task.id.clone();
                if let Err(task) = self.registry.assign(worker_id, task.clone(), now) {
                    self.queue.push_front(task);
                    return None;
                }
                debug!(%worker_id, %task_id, "assign_next: assigned");
                effects.push(Effect::AssignTask {
                    worker_id: worker_id.to_string(),
                    task,
                });
                effects.push(Effect::Notify(CoordinatorEvent::TaskAssigned {
                    worker_id: worker_id.to_string(),
                    task_id: task_id.clone(),
                }));
                return Some(task_id);
            }
            if self.reconcile_lost_work(effects) {
                break;
            }
        }

        if self.config.release_idle_workers {
            info!(%worker_id, "No work left, releasing worker");
            effects.push(Effect::Broadcast(BroadcastCommand::Disconnect(worker_id.to_string())));
        }
        self.check_completion(effects);
        None
    }

    /// Return tasks held by offline workers to the front of the queue
    ///
    /// Returns true when nothing had to be recovered.
    pub fn reconcile_lost_work(&mut self, effects: &mut Vec<Effect>) -> bool {
        let lost = self.registry.take_lost_work();
        if lost.is_empty() {
            return true;
        }

        // Re-insert in reverse so the first lost task ends up at the front
        for (worker_id, task) in lost.into_iter().rev() {
            warn!(%worker_id, task_id = %task.id, "Recovering task from offline worker");
            effects.push(Effect::Notify(CoordinatorEvent::TaskRecovered {
                worker_id,
                task_id: task.id.clone(),
            }));
            self.queue.push_front(task);
        }
        false
    }

    /// Undo an assignment whose publish failed; the task goes back to the front
    pub fn revoke_assignment(&mut self, worker_id: &str, task_id: &str) -> bool {
        let holds = self
            .registry
            .get(worker_id)
            .and_then(|r| r.current_task.as_ref())
            .is_some_and(|t| t.id == task_id);
        if !holds {
            return false;
        }
        match self.registry.revoke(worker_id) {
            Some(task) => {
                warn!(%worker_id, %task_id, "Assignment revoked, task requeued");
                self.queue.push_front(task);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, now: Instant, connected: bool) -> CoordinatorStatus {
        let uptime = self
            .started_at
            .map(|started| now.saturating_duration_since(started).as_secs_f64())
            .unwrap_or(0.0);
        CoordinatorStatus {
            state: self.run_state,
            remaining_tasks: self.queue.len(),
            in_flight: self.registry.busy_count(),
            completed: self.results.len(),
            workers_online: self.registry.online_count(),
            uptime_secs: (uptime * 10.0).round() / 10.0,
            connected,
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let workers: BTreeMap<String, WorkerView> = self
            .registry
            .iter()
            .map(|record| (record.worker_id.clone(), WorkerView::from(record)))
            .collect();
        DashboardSnapshot {
            state: self.run_state,
            total_task: self.total_task,
            queued: self.queue.len(),
            workers,
            generated_at: Utc::now(),
        }
    }

    /// Hand queued work to every idle online worker
    fn dispatch_idle(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        for worker_id in self.registry.idle_online_ids() {
            if self.queue.is_empty() {
                break;
            }
            self.assign_next(&worker_id, now, effects);
        }
    }

    fn check_completion(&mut self, effects: &mut Vec<Effect>) {
        if self.run_state != RunState::Running || !self.is_all_done() {
            return;
        }

        info!(results = self.results.len(), "All tasks done");
        self.transition(RunState::Finished, effects);
        effects.push(Effect::Notify(CoordinatorEvent::Finished {
            results: self.results.clone(),
        }));
        if self.config.publish_dashboard {
            effects.push(Effect::PublishDashboard);
        }
        if self.config.auto_shutdown {
            effects.push(Effect::Disconnect);
        }
    }

    fn transition(&mut self, state: RunState, effects: &mut Vec<Effect>) {
        info!(from = %self.run_state, to = %state, "Coordinator state change");
        self.run_state = state;
        effects.push(Effect::Notify(CoordinatorEvent::StateChanged { state }));
    }
}
