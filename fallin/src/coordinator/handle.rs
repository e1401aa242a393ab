//! CoordinatorHandle - operator-facing interface to the coordinator task

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::dashboard::DashboardSnapshot;
use crate::events::{CoordinatorEvent, EventBus};
use crate::protocol::Task;

use super::messages::{CoordRequest, CoordinatorStatus, RunState, TaskReport};

/// Cloneable handle to a running [`Coordinator`](super::Coordinator)
///
/// Every call is a message to the coordinator task; none of them touch its
/// state directly.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    event_bus: Arc<EventBus>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>, event_bus: Arc<EventBus>) -> Self {
        Self { tx, event_bus }
    }

    async fn send(&self, req: CoordRequest) -> Result<()> {
        self.tx
            .send(req)
            .await
            .map_err(|_| eyre!("Coordinator channel closed"))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> CoordRequest) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| eyre!("Coordinator dropped reply"))
    }

    /// Enqueue tasks; returns the queue length afterwards
    pub async fn add_tasks(&self, tasks: Vec<Task>) -> Result<usize> {
        debug!(count = tasks.len(), "CoordinatorHandle::add_tasks: called");
        self.request(|reply| CoordRequest::AddTasks { tasks, reply }).await
    }

    /// Drop every queued task; returns how many were removed
    pub async fn remove_all_tasks(&self) -> Result<usize> {
        debug!("CoordinatorHandle::remove_all_tasks: called");
        self.request(|reply| CoordRequest::RemoveAllTasks { reply }).await
    }

    pub async fn start(&self) -> Result<()> {
        debug!("CoordinatorHandle::start: called");
        self.request(|reply| CoordRequest::Start { reply }).await??;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        debug!("CoordinatorHandle::pause: called");
        self.request(|reply| CoordRequest::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<()> {
        debug!("CoordinatorHandle::resume: called");
        self.request(|reply| CoordRequest::Resume { reply }).await
    }

    pub async fn stop(&self) -> Result<()> {
        debug!("CoordinatorHandle::stop: called");
        self.request(|reply| CoordRequest::Stop { reply }).await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.request(|reply| CoordRequest::Status { reply }).await
    }

    pub async fn snapshot(&self) -> Result<DashboardSnapshot> {
        self.request(|reply| CoordRequest::Snapshot { reply }).await
    }

    /// Results reported so far, in processing order
    pub async fn results(&self) -> Result<Vec<TaskReport>> {
        self.request(|reply| CoordRequest::Results { reply }).await
    }

    /// Register a callback run for every accepted feedback
    pub async fn on_single_result<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&TaskReport) + Send + Sync + 'static,
    {
        self.send(CoordRequest::OnSingleResult {
            handler: Box::new(handler),
        })
        .await
    }

    /// Register a callback run each time the coordinator finishes
    pub async fn on_finish<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&[TaskReport]) + Send + Sync + 'static,
    {
        self.send(CoordRequest::OnFinish {
            handler: Box::new(handler),
        })
        .await
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_bus.subscribe()
    }

    /// Wait until the coordinator reports `Finished`; returns all results
    pub async fn wait_finished(&self) -> Result<Vec<TaskReport>> {
        debug!("CoordinatorHandle::wait_finished: called");
        // Subscribe before asking, so a finish in between is not missed
        let mut events = self.subscribe();
        if self.status().await?.state == RunState::Finished {
            return self.results().await;
        }

        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::Finished { results }) => return Ok(results),
                Ok(CoordinatorEvent::StateChanged {
                    state: RunState::Stopped,
                }) => return Err(eyre!("Coordinator stopped before finishing")),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "wait_finished: lagged behind events");
                    if self.status().await?.state == RunState::Finished {
                        return self.results().await;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(eyre!("Event bus closed")),
            }
        }
    }

    /// Stop the coordinator task
    pub async fn shutdown(&self) -> Result<()> {
        debug!("CoordinatorHandle::shutdown: called");
        self.send(CoordRequest::Shutdown).await
    }
}
