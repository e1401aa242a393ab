//! Main Coordinator task implementation

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, Delivery, Inbound, Subscription};
use crate::events::{CoordinatorEvent, EventBus, create_event_bus};
use crate::protocol::{Feedback, Heartbeat, Registration, topics};

use super::config::CoordinatorConfig;
use super::error::CoordinatorError;
use super::handle::CoordinatorHandle;
use super::messages::{CoordRequest, FinishHandler, ResultHandler};
use super::state::{CoordinatorState, Effect};

/// Owns the coordinator state and is the only task that mutates it
///
/// Operator calls arrive through a [`CoordinatorHandle`]; channel messages are
/// forwarded into the same request queue, so every transition is serialized.
pub struct Coordinator {
    config: CoordinatorConfig,
    channel: Arc<dyn Channel>,
    event_bus: Arc<EventBus>,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, channel: Arc<dyn Channel>) -> Self {
        Self::with_event_bus(config, channel, create_event_bus())
    }

    pub fn with_event_bus(config: CoordinatorConfig, channel: Arc<dyn Channel>, event_bus: Arc<EventBus>) -> Self {
        debug!(?config, "Coordinator::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self {
            config,
            channel,
            event_bus,
            tx,
            rx,
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone(), self.event_bus.clone())
    }

    /// Spawn the coordinator task and return a handle to it
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run());
        (handle, join)
    }

    /// Run the Coordinator task until shutdown is requested
    pub async fn run(self) {
        let Coordinator {
            config,
            channel,
            event_bus,
            tx,
            mut rx,
        } = self;

        let mut runtime = Runtime {
            state: CoordinatorState::new(config),
            channel,
            event_bus,
            tx,
            result_handlers: Vec::new(),
            finish_handlers: Vec::new(),
            background: Vec::new(),
        };

        info!("Coordinator started");

        while let Some(req) = rx.recv().await {
            debug!(request = ?req, "Coordinator: request");
            match req {
                CoordRequest::AddTasks { tasks, reply } => {
                    let effects = runtime.state.add_tasks(tasks, Instant::now());
                    runtime.apply(effects).await;
                    let _ = reply.send(runtime.state.queue_len());
                }

                CoordRequest::RemoveAllTasks { reply } => {
                    let (removed, effects) = runtime.state.remove_all_tasks();
                    runtime.apply(effects).await;
                    let _ = reply.send(removed);
                }

                CoordRequest::Start { reply } => {
                    let result = runtime.start().await;
                    let _ = reply.send(result);
                }

                CoordRequest::Pause { reply } => {
                    let effects = runtime.state.pause();
                    runtime.apply(effects).await;
                    let _ = reply.send(());
                }

                CoordRequest::Resume { reply } => {
                    let effects = runtime.state.resume(Instant::now());
                    runtime.apply(effects).await;
                    let _ = reply.send(());
                }

                CoordRequest::Stop { reply } => {
                    let effects = runtime.state.stop();
                    runtime.apply(effects).await;
                    let _ = reply.send(());
                }

                CoordRequest::Status { reply } => {
                    let status = runtime.state.status(Instant::now(), runtime.channel.is_connected());
                    let _ = reply.send(status);
                }

                CoordRequest::Snapshot { reply } => {
                    let _ = reply.send(runtime.state.snapshot());
                }

                CoordRequest::Results { reply } => {
                    let _ = reply.send(runtime.state.results().to_vec());
                }

                CoordRequest::OnSingleResult { handler } => {
                    runtime.result_handlers.push(handler);
                }

                CoordRequest::OnFinish { handler } => {
                    runtime.finish_handlers.push(handler);
                }

                CoordRequest::Inbound(inbound) => {
                    runtime.handle_inbound(inbound).await;
                }

                CoordRequest::Sweep => {
                    let effects = runtime.state.sweep(Instant::now());
                    runtime.apply(effects).await;
                }

                CoordRequest::DashboardTick => {
                    runtime.publish_dashboard().await;
                }

                CoordRequest::Shutdown => {
                    info!("Coordinator shutting down");
                    runtime.teardown().await;
                    break;
                }
            }
        }

        info!("Coordinator stopped");
    }
}

/// Everything the coordinator task owns while running
struct Runtime {
    state: CoordinatorState,
    channel: Arc<dyn Channel>,
    event_bus: Arc<EventBus>,
    tx: mpsc::Sender<CoordRequest>,
    result_handlers: Vec<ResultHandler>,
    finish_handlers: Vec<FinishHandler>,
    /// Subscription pumps and timers
    background: Vec<JoinHandle<()>>,
}

impl Runtime {
    async fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.state.is_terminated() {
            return Err(CoordinatorError::Terminated);
        }

        if self.background.is_empty() {
            for pattern in [topics::REGISTRATION, topics::FEEDBACK, topics::HEARTBEAT] {
                let subscription = self
                    .channel
                    .subscribe(pattern)
                    .await
                    .map_err(|e| CoordinatorError::Channel(e.to_string()))?;
                self.background.push(spawn_pump(subscription, self.tx.clone()));
            }

            let config = self.state.config();
            self.background
                .push(spawn_ticker(config.sweep_interval(), self.tx.clone(), || CoordRequest::Sweep));
            if let Some(period) = config.dashboard_interval() {
                self.background
                    .push(spawn_ticker(period, self.tx.clone(), || CoordRequest::DashboardTick));
            }
        }

        let effects = self.state.start(Instant::now())?;
        self.apply(effects).await;
        Ok(())
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        let now = Instant::now();
        let effects = match inbound.topic.as_str() {
            topics::REGISTRATION => match Registration::decode(&inbound.payload) {
                Ok(registration) => self.state.on_registration(registration, now),
                Err(e) => return self.protocol_violation(None, e.to_string()),
            },
            topics::FEEDBACK => match Feedback::decode(&inbound.payload) {
                Ok(feedback) => {
                    let worker_id = feedback.worker_id.clone();
                    match self.state.on_feedback(feedback, now) {
                        Ok(effects) => effects,
                        Err(e) => return self.protocol_violation(Some(worker_id), e.to_string()),
                    }
                }
                Err(e) => return self.protocol_violation(None, e.to_string()),
            },
            topics::HEARTBEAT => match Heartbeat::decode(&inbound.payload) {
                Ok(heartbeat) => self.state.on_heartbeat(heartbeat, now),
                Err(e) => return self.protocol_violation(None, e.to_string()),
            },
            other => {
                debug!(topic = %other, "Coordinator: ignoring message on unexpected topic");
                return;
            }
        };
        self.apply(effects).await;
    }

    fn protocol_violation(&self, worker_id: Option<String>, message: String) {
        warn!(?worker_id, %message, "Dropping inbound message");
        self.event_bus
            .emit(CoordinatorEvent::ProtocolViolation { worker_id, message });
    }

    /// Carry out effects in order; the dashboard publish and disconnect go last
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut dashboard = false;
        let mut disconnect = false;
        let mut revoked: Vec<String> = Vec::new();

        for effect in effects {
            match effect {
                Effect::AssignTask { worker_id, task } => {
                    let topic = topics::task_topic(&worker_id);
                    let published = match task.encode() {
                        Ok(payload) => self
                            .channel
                            .publish(&topic, payload, Delivery::AtLeastOnce)
                            .await
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    if let Err(e) = published {
                        error!(%worker_id, task_id = %task.id, error = %e, "Failed to publish task");
                        if self.state.revoke_assignment(&worker_id, &task.id) {
                            revoked.push(task.id);
                        }
                    }
                }

                Effect::Broadcast(command) => {
                    if let Err(e) = self
                        .channel
                        .publish(topics::BROADCAST, command.encode(), Delivery::BestEffort)
                        .await
                    {
                        warn!(%command, error = %e, "Failed to publish broadcast");
                    }
                }

                Effect::Notify(CoordinatorEvent::TaskAssigned { task_id, .. }) if revoked.contains(&task_id) => {}

                Effect::Notify(event) => self.notify(event),

                Effect::PublishDashboard => dashboard = true,

                Effect::Disconnect => disconnect = true,
            }
        }

        if dashboard {
            self.publish_dashboard().await;
        }
        if disconnect {
            self.teardown().await;
        }
    }

    fn notify(&self, event: CoordinatorEvent) {
        match &event {
            CoordinatorEvent::SingleResult { report } => {
                for handler in &self.result_handlers {
                    handler(report);
                }
            }
            CoordinatorEvent::Finished { results } => {
                for handler in &self.finish_handlers {
                    handler(results);
                }
            }
            _ => {}
        }
        self.event_bus.emit(event);
    }

    async fn publish_dashboard(&self) {
        if !self.channel.is_connected() {
            return;
        }
        match self.state.snapshot().encode() {
            Ok(payload) => {
                if let Err(e) = self
                    .channel
                    .publish(topics::DASHBOARD, payload, Delivery::BestEffort)
                    .await
                {
                    warn!(error = %e, "Failed to publish dashboard snapshot");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode dashboard snapshot"),
        }
    }

    /// Stop pumps and timers, then disconnect
    async fn teardown(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        if self.channel.is_connected() {
            if let Err(e) = self.channel.disconnect().await {
                warn!(error = %e, "Failed to disconnect channel");
            }
        }
    }
}

/// Forward every message of a subscription into the coordinator queue
fn spawn_pump(mut subscription: Subscription, tx: mpsc::Sender<CoordRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pattern = subscription.pattern().to_string();
        while let Some(inbound) = subscription.next().await {
            if tx.send(CoordRequest::Inbound(inbound)).await.is_err() {
                break;
            }
        }
        debug!(%pattern, "Coordinator: subscription closed");
    })
}

/// Send a request into the coordinator queue on a fixed period
fn spawn_ticker<F>(period: Duration, tx: mpsc::Sender<CoordRequest>, make: F) -> JoinHandle<()>
where
    F: Fn() -> CoordRequest + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    })
}
