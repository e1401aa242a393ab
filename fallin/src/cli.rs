//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Fallin - pull-based task dispatch over pub/sub
#[derive(Parser)]
#[command(
    name = "fallin",
    about = "Hand out simulation tasks to a pool of remote workers",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help()
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Broker URL, overrides `broker.url` from the config file
    #[arg(short, long, global = true)]
    pub broker: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator over a task file until every task has a result
    Manager {
        /// Task file (YAML or JSON)
        #[arg(value_name = "FILE")]
        tasks: PathBuf,

        /// Disconnect from the broker once all tasks are done
        #[arg(long)]
        auto_shutdown: bool,

        /// Send `disconnect` to workers left idle with nothing queued
        #[arg(long)]
        release_idle: bool,

        /// Append coordinator events as JSON lines to this file
        #[arg(long, value_name = "PATH")]
        events_log: Option<PathBuf>,

        /// Output format for the final results (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a worker agent that executes assigned tasks
    Worker {
        /// Worker id (default: generated `Worker_XXXXXX`)
        #[arg(long)]
        id: Option<String>,

        /// Ignore `disconnect` commands from the coordinator
        #[arg(long)]
        persistent: bool,

        /// Case to open before serving tasks
        #[arg(long, value_name = "PATH")]
        case: Option<String>,
    },

    /// Follow the dashboard topic and print progress
    Dashboard {
        /// Print snapshots as JSON lines instead of rendered text
        #[arg(long)]
        json: bool,
    },

    /// Run a coordinator and workers in-process over an in-memory broker
    Demo {
        /// Number of workers
        #[arg(short, long, default_value = "3")]
        workers: usize,

        /// Number of tasks
        #[arg(short, long, default_value = "10")]
        tasks: usize,

        /// Simulated latency per operation in milliseconds
        #[arg(long, default_value = "20")]
        op_latency_ms: u64,
    },
}

/// Output format for results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Directory the log files are written to
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fallin")
        .join("logs")
}

/// Log file for one subcommand, e.g. `manager.log`
pub fn get_log_path(command: &Command) -> PathBuf {
    let name = match command {
        Command::Manager { .. } => "manager",
        Command::Worker { .. } => "worker",
        Command::Dashboard { .. } => "dashboard",
        Command::Demo { .. } => "demo",
    };
    get_log_dir().join(format!("{}.log", name))
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_dir().display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_manager() {
        let cli = Cli::try_parse_from([
            "fallin",
            "-l",
            "debug",
            "manager",
            "tasks.yml",
            "--auto-shutdown",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Manager {
                tasks,
                auto_shutdown,
                release_idle,
                events_log,
                format,
            } => {
                assert_eq!(tasks, PathBuf::from("tasks.yml"));
                assert!(auto_shutdown);
                assert!(!release_idle);
                assert!(events_log.is_none());
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_worker_with_global_broker() {
        let cli = Cli::try_parse_from(["fallin", "worker", "--persistent", "--broker", "nats://b:4222"]).unwrap();
        assert_eq!(cli.broker.as_deref(), Some("nats://b:4222"));
        assert!(matches!(
            cli.command,
            Command::Worker {
                persistent: true,
                id: None,
                ..
            }
        ));
        assert!(get_log_path(&cli.command).ends_with("worker.log"));
    }

    #[test]
    fn test_output_format() {
        assert_eq!("PLAIN".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
