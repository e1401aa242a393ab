use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fallin::channel::{Channel, MemoryBroker, NatsChannel};
use fallin::cli::{Cli, Command, OutputFormat, get_log_path};
use fallin::config::{Config, load_log_level};
use fallin::coordinator::{Coordinator, TaskReport};
use fallin::dashboard::{DashboardConsumer, render};
use fallin::events::{EventLogger, spawn_event_logger};
use fallin::protocol::{Operation, Task, TaskOutcome};
use fallin::taskfile::load_tasks;
use fallin::worker::{HostInfo, SimulatedEngine, WorkerAgent, WorkerConfig, WorkerExit, generate_worker_id};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, log_path: &Path) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = load_log_level(cli.config.as_ref());
    setup_logging(
        cli.log_level.as_deref(),
        config_log_level.as_deref(),
        &get_log_path(&cli.command),
    )
    .context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(url) = cli.broker {
        config.broker.url = url;
    }

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Manager {
            tasks,
            auto_shutdown,
            release_idle,
            events_log,
            format,
        } => {
            config.coordinator.auto_shutdown |= auto_shutdown;
            config.coordinator.release_idle_workers |= release_idle;
            cmd_manager(config, &tasks, events_log, format).await
        }
        Command::Worker { id, persistent, case } => {
            config.worker.id = id.or(config.worker.id);
            config.worker.persistent |= persistent;
            config.worker.case = case.or(config.worker.case);
            cmd_worker(config).await
        }
        Command::Dashboard { json } => cmd_dashboard(config, json).await,
        Command::Demo {
            workers,
            tasks,
            op_latency_ms,
        } => cmd_demo(config, workers, tasks, op_latency_ms).await,
    }
}

/// Resolve once SIGINT or SIGTERM arrives
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received");
    }

    Ok(())
}

/// Send `()` on the returned receiver once a shutdown signal arrives
fn shutdown_receiver() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!(error = %e, "Failed to listen for shutdown signals");
            return;
        }
        let _ = tx.send(()).await;
    });
    rx
}

async fn connect(url: &str, name: &str) -> Result<Arc<dyn Channel>> {
    let channel = NatsChannel::connect(url, name)
        .await
        .context(format!("Failed to connect to broker at {}", url))?;
    Ok(Arc::new(channel))
}

async fn cmd_manager(config: Config, tasks_path: &Path, events_log: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    debug!(?tasks_path, ?events_log, ?format, "cmd_manager: called");
    let tasks = load_tasks(tasks_path)?;
    println!("Loaded {} tasks from {}", tasks.len(), tasks_path.display());

    let auto_shutdown = config.coordinator.auto_shutdown;
    let channel = connect(&config.broker.url, "fallin-manager").await?;
    let coordinator = Coordinator::new(config.coordinator, channel);

    let logger = match events_log {
        Some(path) => {
            let logger = EventLogger::open(&path)?;
            println!("Logging events to {}", path.display());
            Some(spawn_event_logger(logger, coordinator.event_bus()))
        }
        None => None,
    };

    let (handle, join) = coordinator.spawn();
    if format == OutputFormat::Text {
        handle
            .on_single_result(|report| println!("{}", format_report(report)))
            .await?;
    }

    handle.add_tasks(tasks).await?;
    handle.start().await?;
    println!("{}", handle.status().await?);

    let finished = tokio::select! {
        results = handle.wait_finished() => Some(results?),
        signal = shutdown_signal() => {
            signal?;
            println!("Interrupted");
            None
        }
    };

    if let Some(results) = &finished {
        print_results(results, format)?;
        if !auto_shutdown {
            println!("All tasks done; workers stay connected. Press Ctrl+C to exit.");
            shutdown_signal().await?;
        }
    }

    handle.stop().await?;
    println!("{}", handle.status().await?);
    handle.shutdown().await?;
    let _ = join.await;
    if let Some(logger) = logger {
        logger.abort();
    }
    Ok(())
}

async fn cmd_worker(mut config: Config) -> Result<()> {
    let id = config.worker.resolve_id();
    config.worker.id = Some(id.clone());
    debug!(%id, "cmd_worker: called");

    let channel = connect(&config.broker.url, &id).await?;
    let mut engine = SimulatedEngine::new(config.worker.op_latency());
    if let Some(case) = &config.worker.case {
        engine = engine.with_case(case.clone());
    }

    println!("Worker {} connected to {}", id.bold(), config.broker.url);
    let agent = WorkerAgent::new(config.worker, channel, engine);
    let exit = agent.run(shutdown_receiver()).await?;
    match exit {
        WorkerExit::Shutdown => println!("Worker {} shut down", id),
        WorkerExit::Dismissed => println!("Worker {} dismissed by coordinator", id),
        WorkerExit::ChannelClosed => println!("Worker {} lost its connection", id),
    }
    Ok(())
}

async fn cmd_dashboard(config: Config, json: bool) -> Result<()> {
    debug!(json, "cmd_dashboard: called");
    let channel = connect(&config.broker.url, "fallin-dashboard").await?;
    let consumer = DashboardConsumer::new(channel);

    let seen = consumer
        .run(shutdown_receiver(), |snapshot| {
            if json {
                match serde_json::to_string(snapshot) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
                }
            } else {
                println!("{}", render(snapshot));
            }
        })
        .await?;
    info!(seen, "Dashboard stopped");
    Ok(())
}

/// Coordinator plus `workers` agents over an in-memory broker
async fn cmd_demo(mut config: Config, workers: usize, task_count: usize, op_latency_ms: u64) -> Result<()> {
    debug!(workers, task_count, op_latency_ms, "cmd_demo: called");
    let broker = MemoryBroker::new();
    config.coordinator.release_idle_workers = true;
    config.coordinator.auto_shutdown = true;

    let coordinator = Coordinator::new(config.coordinator, Arc::new(broker.connect("manager")));
    let (handle, join) = coordinator.spawn();
    handle
        .on_single_result(|report| println!("{}", format_report(report)))
        .await?;
    handle.add_tasks(demo_tasks(task_count)).await?;
    handle.start().await?;

    let host = HostInfo::probe();
    let mut agents = Vec::with_capacity(workers);
    for _ in 0..workers {
        let worker_config = WorkerConfig {
            id: Some(generate_worker_id()),
            op_latency_ms,
            ..config.worker.clone()
        };
        let id = worker_config.resolve_id();
        let engine = SimulatedEngine::new(worker_config.op_latency()).with_case("demo.pwb");
        let agent = WorkerAgent::new(worker_config, Arc::new(broker.connect(id.clone())), engine).with_host(host.clone());
        let (stop_tx, stop_rx) = mpsc::channel(1);
        agents.push((id, stop_tx, tokio::spawn(agent.run(stop_rx))));
    }
    println!("Demo: {} tasks, {} workers", task_count, workers);

    let outcome = tokio::select! {
        results = handle.wait_finished() => results,
        signal = shutdown_signal() => signal.and_then(|_| Err(eyre::eyre!("Interrupted"))),
    };

    if outcome.is_err() {
        handle.stop().await?;
    }
    let summary = handle.snapshot().await?;
    handle.shutdown().await?;
    let _ = join.await;

    for (id, stop_tx, agent) in agents {
        let _ = stop_tx.try_send(());
        match tokio::time::timeout(Duration::from_secs(5), agent).await {
            Ok(Ok(Ok(exit))) => debug!(%id, ?exit, "Demo worker exited"),
            Ok(Ok(Err(e))) => warn!(%id, error = %e, "Demo worker failed"),
            Ok(Err(e)) => warn!(%id, error = %e, "Demo worker panicked"),
            Err(_) => warn!(%id, "Demo worker did not stop in time"),
        }
    }

    let results = outcome?;
    print_results(&results, OutputFormat::Text)?;
    for (id, worker) in &summary.workers {
        println!(
            "{}: {} tasks, {:.1}s busy, efficiency {}",
            id,
            worker.completed_tasks,
            worker.working_time_secs,
            worker
                .efficiency
                .map_or_else(|| "-".to_string(), |e| format!("{:.2}s/task", e))
        );
    }
    Ok(())
}

/// A transient stability run per contingency
fn demo_tasks(count: usize) -> Vec<Task> {
    (1..=count)
        .map(|i| {
            let contingency = format!("ctg-{:03}", i);
            Task {
                id: contingency.clone(),
                steps: vec![
                    Operation::CreateData {
                        object_type: "TSContingencyElement".to_string(),
                        fields: vec!["Contingency".to_string(), "TSTimeInSeconds".to_string()],
                        values: vec![contingency.clone(), format!("{}", i)],
                    },
                    Operation::TsSolve {
                        contingency: contingency.clone(),
                    },
                    Operation::TsGetResults {
                        contingency,
                        fields: vec!["Bus 4 | frequency".to_string()],
                    },
                ],
            }
        })
        .collect()
}

fn format_report(report: &TaskReport) -> String {
    match &report.outcome {
        TaskOutcome::Completed { value } => format!(
            "{} {} on {} -> {} ({:.2}s)",
            "done".green(),
            report.task_id,
            report.worker_id,
            value,
            report.elapsed_secs
        ),
        TaskOutcome::Failed { error } => format!(
            "{} {} on {}: {}",
            "failed".red(),
            report.task_id,
            report.worker_id,
            error
        ),
    }
}

fn print_results(results: &[TaskReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            let failed = results
                .iter()
                .filter(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
                .count();
            println!(
                "{} {} tasks, {} failed",
                "Finished:".bold(),
                results.len(),
                failed
            );
        }
    }
    Ok(())
}
