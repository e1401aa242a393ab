//! Worker agent - the coordinator's counterpart inside each worker process

use std::sync::Arc;

use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelError, Delivery, Inbound};
use crate::protocol::{
    BroadcastCommand, Feedback, Heartbeat, Registration, Task, TaskOutcome, topics, validate_worker_id,
};

use super::config::WorkerConfig;
use super::engine::ExecutionEngine;
use super::host::HostInfo;
use super::interpreter::Interpreter;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Local shutdown signal
    Shutdown,
    /// The coordinator sent `disconnect <id>`
    Dismissed,
    /// The channel closed underneath us
    ChannelClosed,
}

pub struct WorkerAgent<E> {
    id: String,
    config: WorkerConfig,
    channel: Arc<dyn Channel>,
    interpreter: Interpreter<E>,
    host: HostInfo,
    completed: u64,
}

impl<E: ExecutionEngine> WorkerAgent<E> {
    pub fn new(config: WorkerConfig, channel: Arc<dyn Channel>, engine: E) -> Self {
        let id = config.resolve_id();
        debug!(%id, ?config, "WorkerAgent::new: called");
        Self {
            id,
            config,
            channel,
            interpreter: Interpreter::new(engine),
            host: HostInfo::probe(),
            completed: 0,
        }
    }

    /// Report these descriptors instead of probing the host
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn register(&self) -> Result<(), ChannelError> {
        debug!(worker_id = %self.id, "WorkerAgent::register: called");
        let registration = Registration {
            id: self.id.clone(),
            machine: self.host.machine.clone(),
            hardware: self.host.hardware.clone(),
        };
        let payload = registration
            .encode()
            .map_err(|e| ChannelError::Publish {
                topic: topics::REGISTRATION.to_string(),
                message: e.to_string(),
            })?;
        self.channel
            .publish(topics::REGISTRATION, payload, Delivery::AtLeastOnce)
            .await
    }

    /// Serve tasks until shutdown, dismissal or disconnect
    ///
    /// Subscriptions are in place before the first registration, so a task
    /// assigned in reply to it cannot be missed. An id the coordinator would
    /// reject fails here instead of idling unregistered.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<WorkerExit> {
        validate_worker_id(&self.id).context("Worker id cannot be used on the channel")?;

        let mut broadcast = self
            .channel
            .subscribe(topics::BROADCAST)
            .await
            .context("Failed to subscribe to broadcast")?;
        let mut tasks = self
            .channel
            .subscribe(&topics::task_topic(&self.id))
            .await
            .context("Failed to subscribe to task topic")?;

        self.register().await.context("Failed to register")?;
        info!(worker_id = %self.id, persistent = self.config.persistent, "Worker registered");

        let heartbeat = spawn_heartbeat(self.id.clone(), self.channel.clone(), &self.config);
        let mut shutdown_open = true;

        let exit = loop {
            tokio::select! {
                signal = shutdown.recv(), if shutdown_open => {
                    match signal {
                        Some(()) => break WorkerExit::Shutdown,
                        None => shutdown_open = false,
                    }
                }
                inbound = tasks.next() => {
                    let Some(inbound) = inbound else { break WorkerExit::ChannelClosed };
                    self.handle_task(inbound).await;
                }
                inbound = broadcast.next() => {
                    let Some(inbound) = inbound else { break WorkerExit::ChannelClosed };
                    if self.handle_broadcast(inbound).await {
                        break WorkerExit::Dismissed;
                    }
                }
            }
        };

        heartbeat.abort();
        if self.channel.is_connected() {
            if let Err(e) = self.channel.disconnect().await {
                warn!(worker_id = %self.id, error = %e, "Failed to disconnect");
            }
        }
        info!(worker_id = %self.id, ?exit, completed = self.completed, "Worker stopped");
        Ok(exit)
    }

    async fn handle_task(&mut self, inbound: Inbound) {
        let (task_id, outcome) = match Task::decode(&inbound.payload) {
            Ok(task) => {
                info!(worker_id = %self.id, task_id = %task.id, steps = task.steps.len(), "Executing task");
                let outcome = self.interpreter.outcome(&task).await;
                (task.id, outcome)
            }
            Err(e) => {
                // Still answer if the id is readable, so the coordinator frees this worker
                let task_id = serde_json::from_slice::<Value>(&inbound.payload)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_str).map(String::from));
                match task_id {
                    Some(task_id) => (task_id, TaskOutcome::Failed { error: e.to_string() }),
                    None => {
                        warn!(worker_id = %self.id, error = %e, "Dropping unreadable task payload");
                        return;
                    }
                }
            }
        };

        match &outcome {
            TaskOutcome::Completed { value } => info!(worker_id = %self.id, %task_id, value, "Task done"),
            TaskOutcome::Failed { error } => warn!(worker_id = %self.id, %task_id, %error, "Task failed"),
        }
        self.completed += 1;

        let feedback = Feedback::new(self.id.clone(), task_id, outcome);
        let published = match feedback.encode() {
            Ok(payload) => self
                .channel
                .publish(topics::FEEDBACK, payload, Delivery::AtLeastOnce)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = published {
            error!(worker_id = %self.id, task_id = %feedback.task_id, error = %e, "Failed to publish feedback");
        }
    }

    /// Returns true when this worker has been dismissed
    async fn handle_broadcast(&self, inbound: Inbound) -> bool {
        match BroadcastCommand::decode(&inbound.payload) {
            Ok(BroadcastCommand::FallIn) => {
                debug!(worker_id = %self.id, "Fall-in received, registering again");
                if let Err(e) = self.register().await {
                    error!(worker_id = %self.id, error = %e, "Failed to re-register");
                }
                false
            }
            Ok(BroadcastCommand::Disconnect(target)) if target == self.id => {
                if self.config.persistent {
                    info!(worker_id = %self.id, "Disconnect ignored, worker is persistent");
                    false
                } else {
                    info!(worker_id = %self.id, "Job done, leaving");
                    true
                }
            }
            Ok(BroadcastCommand::Disconnect(_)) => false,
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "Ignoring unknown broadcast");
                false
            }
        }
    }
}

/// Publish heartbeats on a timer until the channel goes away
///
/// Runs beside task execution, so a long task never looks like a dead worker.
fn spawn_heartbeat(worker_id: String, channel: Arc<dyn Channel>, config: &WorkerConfig) -> JoinHandle<()> {
    let period = config.heartbeat_interval();
    tokio::spawn(async move {
        let heartbeat = Heartbeat { id: worker_id };
        let payload = match heartbeat.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode heartbeat");
                return;
            }
        };

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match channel
                .publish(topics::HEARTBEAT, payload.clone(), Delivery::BestEffort)
                .await
            {
                Ok(()) => {}
                Err(ChannelError::NotConnected) => break,
                Err(e) => warn!(worker_id = %heartbeat.id, error = %e, "Failed to publish heartbeat"),
            }
        }
        debug!(worker_id = %heartbeat.id, "Heartbeat stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryBroker;
    use crate::protocol::Operation;
    use crate::worker::SimulatedEngine;
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        broker: MemoryBroker,
        manager: Arc<dyn Channel>,
        registrations: crate::channel::Subscription,
        feedback: crate::channel::Subscription,
        shutdown: mpsc::Sender<()>,
        join: JoinHandle<Result<WorkerExit>>,
    }

    async fn fixture(persistent: bool) -> Fixture {
        let broker = MemoryBroker::new();
        let manager: Arc<dyn Channel> = Arc::new(broker.connect("manager"));
        let registrations = manager.subscribe(topics::REGISTRATION).await.unwrap();
        let feedback = manager.subscribe(topics::FEEDBACK).await.unwrap();

        let config = WorkerConfig {
            id: Some("Worker_T1".to_string()),
            persistent,
            heartbeat_interval_ms: 60_000,
            op_latency_ms: 0,
            ..Default::default()
        };
        let engine = SimulatedEngine::seeded(Duration::ZERO, 11).with_case("case.pwb");
        let agent = WorkerAgent::new(config, Arc::new(broker.connect("Worker_T1")), engine).with_host(HostInfo {
            machine: "test-host".to_string(),
            hardware: vec![json!(4)],
        });

        let (shutdown, rx) = mpsc::channel(1);
        let join = tokio::spawn(agent.run(rx));
        Fixture {
            broker,
            manager,
            registrations,
            feedback,
            shutdown,
            join,
        }
    }

    async fn publish(channel: &Arc<dyn Channel>, topic: &str, payload: Bytes) {
        channel.publish(topic, payload, Delivery::AtLeastOnce).await.unwrap();
    }

    #[tokio::test]
    async fn test_registers_and_reports_result() {
        let mut f = fixture(false).await;
        let registration = f.registrations.next().await.unwrap();
        let registration = Registration::decode(&registration.payload).unwrap();
        assert_eq!(registration.id, "Worker_T1");
        assert_eq!(registration.machine, "test-host");

        let task = Task::with_id(
            "ctg-1",
            vec![
                Operation::TsSolve {
                    contingency: "c".to_string(),
                },
                Operation::TsGetResults {
                    contingency: "c".to_string(),
                    fields: vec!["Bus 4 | frequency".to_string()],
                },
            ],
        );
        publish(&f.manager, &topics::task_topic("Worker_T1"), task.encode().unwrap()).await;

        let msg = f.feedback.next().await.unwrap();
        let feedback = Feedback::decode(&msg.payload).unwrap();
        assert_eq!(feedback.worker_id, "Worker_T1");
        assert_eq!(feedback.task_id, "ctg-1");
        assert!(feedback.outcome.is_success());

        f.shutdown.send(()).await.unwrap();
        assert_eq!(f.join.await.unwrap().unwrap(), WorkerExit::Shutdown);
    }

    #[tokio::test]
    async fn test_failed_task_is_reported_as_failure() {
        let mut f = fixture(false).await;
        f.registrations.next().await.unwrap();

        let task = Task::with_id("t-bad", vec![Operation::Delete {
            object_type: "Nothing".to_string(),
        }]);
        publish(&f.manager, &topics::task_topic("Worker_T1"), task.encode().unwrap()).await;

        let feedback = Feedback::decode(&f.feedback.next().await.unwrap().payload).unwrap();
        assert_eq!(feedback.task_id, "t-bad");
        assert!(matches!(feedback.outcome, TaskOutcome::Failed { .. }));

        // Unknown operation: the id is still readable, so a failure is reported
        let payload = json!({"id": "t-weird", "steps": [{"op": "format-disk"}]}).to_string();
        publish(&f.manager, &topics::task_topic("Worker_T1"), Bytes::from(payload)).await;
        let feedback = Feedback::decode(&f.feedback.next().await.unwrap().payload).unwrap();
        assert_eq!(feedback.task_id, "t-weird");
        assert!(!feedback.outcome.is_success());

        f.shutdown.send(()).await.unwrap();
        f.join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_id_fails_before_registering() {
        let broker = MemoryBroker::new();
        let manager: Arc<dyn Channel> = Arc::new(broker.connect("manager"));
        let mut registrations = manager.subscribe(topics::REGISTRATION).await.unwrap();

        let config = WorkerConfig {
            id: Some("node.7".to_string()),
            ..Default::default()
        };
        let engine = SimulatedEngine::seeded(Duration::ZERO, 3);
        let agent = WorkerAgent::new(config, Arc::new(broker.connect("node.7")), engine);
        let (_shutdown, rx) = mpsc::channel(1);

        let err = agent.run(rx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("node.7"));
        assert_eq!(broker.subscription_count(), 1);

        manager.disconnect().await.unwrap();
        assert!(registrations.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fall_in_triggers_registration() {
        let mut f = fixture(false).await;
        f.registrations.next().await.unwrap();

        publish(&f.manager, topics::BROADCAST, BroadcastCommand::FallIn.encode()).await;
        let again = f.registrations.next().await.unwrap();
        assert_eq!(Registration::decode(&again.payload).unwrap().id, "Worker_T1");

        f.shutdown.send(()).await.unwrap();
        f.join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_dismisses_only_target() {
        let mut f = fixture(false).await;
        f.registrations.next().await.unwrap();

        let other = BroadcastCommand::Disconnect("Worker_OTHER".to_string());
        publish(&f.manager, topics::BROADCAST, other.encode()).await;
        let mine = BroadcastCommand::Disconnect("Worker_T1".to_string());
        publish(&f.manager, topics::BROADCAST, mine.encode()).await;

        assert_eq!(f.join.await.unwrap().unwrap(), WorkerExit::Dismissed);
        // Only the manager's two subscriptions remain
        assert_eq!(f.broker.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_persistent_worker_ignores_disconnect() {
        let mut f = fixture(true).await;
        f.registrations.next().await.unwrap();

        let mine = BroadcastCommand::Disconnect("Worker_T1".to_string());
        publish(&f.manager, topics::BROADCAST, mine.encode()).await;
        publish(&f.manager, topics::BROADCAST, BroadcastCommand::FallIn.encode()).await;

        // Still alive: it answers the fall-in
        f.registrations.next().await.unwrap();

        f.shutdown.send(()).await.unwrap();
        assert_eq!(f.join.await.unwrap().unwrap(), WorkerExit::Shutdown);
    }
}
