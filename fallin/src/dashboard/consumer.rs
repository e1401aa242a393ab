//! Dashboard consumer - follows the `dashboard` topic and renders progress

use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::coordinator::WorkerStatus;
use crate::protocol::topics;

use super::snapshot::{DashboardSnapshot, DashboardSummary};

pub struct DashboardConsumer {
    channel: Arc<dyn Channel>,
}

impl DashboardConsumer {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Call `on_snapshot` for every snapshot until shutdown or disconnect
    ///
    /// Returns how many snapshots were seen. Malformed payloads are skipped.
    pub async fn run<F>(self, mut shutdown: mpsc::Receiver<()>, mut on_snapshot: F) -> Result<usize>
    where
        F: FnMut(&DashboardSnapshot),
    {
        debug!("DashboardConsumer::run: called");
        let mut subscription = self
            .channel
            .subscribe(topics::DASHBOARD)
            .await
            .context("Failed to subscribe to dashboard topic")?;

        let mut seen = 0;
        loop {
            tokio::select! {
                inbound = subscription.next() => {
                    let Some(inbound) = inbound else {
                        info!("DashboardConsumer: channel closed");
                        break;
                    };
                    match DashboardSnapshot::decode(&inbound.payload) {
                        Ok(snapshot) => {
                            seen += 1;
                            on_snapshot(&snapshot);
                        }
                        Err(e) => warn!(error = %e, "DashboardConsumer: dropping malformed snapshot"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("DashboardConsumer: shutdown requested");
                    break;
                }
            }
        }

        Ok(seen)
    }
}

/// Render a snapshot as terminal lines
pub fn render(snapshot: &DashboardSnapshot) -> String {
    let summary = DashboardSummary::from_snapshot(snapshot);
    let mut out = format!(
        "{} {}  {} {}  {} {}  {} {}  ({:.0}%)\n",
        "state".bold(),
        snapshot.state,
        "done".bold(),
        summary.completed.to_string().green(),
        "running".bold(),
        summary.in_flight.to_string().blue(),
        "remaining".bold(),
        summary.remaining.to_string().yellow(),
        summary.percent_done(),
    );

    for (worker_id, view) in &snapshot.workers {
        let status = match view.status {
            WorkerStatus::Online => "online".green(),
            WorkerStatus::Offline => "offline".red(),
        };
        let efficiency = view
            .efficiency
            .map(|e| format!("{:.2}s/task", e))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  {:<16} {:<8} tasks={:<4} eff={:<12} {}\n",
            worker_id,
            status,
            view.completed_tasks,
            efficiency,
            view.current_task.as_deref().unwrap_or("idle").dimmed(),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Delivery, MemoryBroker};
    use crate::coordinator::RunState;
    use crate::dashboard::WorkerView;
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot() -> DashboardSnapshot {
        let mut workers = BTreeMap::new();
        workers.insert(
            "Worker_A".to_string(),
            WorkerView {
                status: WorkerStatus::Online,
                machine: "node".to_string(),
                hardware: vec![],
                current_task: None,
                working_time_secs: 3.0,
                completed_tasks: 2,
                efficiency: Some(1.5),
            },
        );
        DashboardSnapshot {
            state: RunState::Finished,
            total_task: 2,
            queued: 0,
            workers,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_lists_workers() {
        colored::control::set_override(false);
        let text = render(&snapshot());
        assert!(text.contains("done 2"));
        assert!(text.contains("Worker_A"));
        assert!(text.contains("1.50s/task"));
        assert!(text.contains("idle"));
    }

    #[tokio::test]
    async fn test_consumer_skips_malformed_snapshots() {
        let broker = MemoryBroker::new();
        let channel: Arc<dyn Channel> = Arc::new(broker.connect("dashboard-test"));
        let publisher = broker.connect("publisher");
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let consumer = DashboardConsumer::new(channel.clone());
        let handle = tokio::spawn(async move {
            let mut states = Vec::new();
            let seen = consumer.run(shutdown_rx, |s| states.push(s.state)).await.unwrap();
            (seen, states)
        });

        while broker.subscription_count() == 0 {
            tokio::task::yield_now().await;
        }

        publisher
            .publish(topics::DASHBOARD, Bytes::from_static(b"garbage"), Delivery::BestEffort)
            .await
            .unwrap();
        publisher
            .publish(topics::DASHBOARD, snapshot().encode().unwrap(), Delivery::BestEffort)
            .await
            .unwrap();

        // Buffered messages drain before the closed subscription ends the loop
        channel.disconnect().await.unwrap();
        let (seen, states) = handle.await.unwrap();
        assert_eq!(seen, 1);
        assert_eq!(states, vec![RunState::Finished]);
    }
}
