mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_core::config::Config;
use corral_core::types::TaskPriority;
use corral_dispatch::facade::Coordinator;
use uuid::Uuid;

/// corral CLI -- create, route, and track tasks across a pool of agents.
#[derive(Parser)]
#[command(name = "corral", version, about)]
struct Cli {
    /// Path to the config file (defaults to ~/.corral/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON instead of human-readable lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show task and agent counts (default when no subcommand is given).
    Stats,

    /// Create a new task.
    Create {
        /// Task title.
        title: String,
        /// Longer description; feeds the keyword router.
        #[arg(short, long, default_value = "")]
        description: String,
        /// Priority: low, medium, high, or critical.
        #[arg(short, long, default_value = "medium")]
        priority: String,
        /// Task ids that must finish first (repeatable).
        #[arg(long = "after")]
        after: Vec<Uuid>,
    },

    /// Route a pending task to an agent.
    Dispatch {
        /// Task id to dispatch.
        id: Uuid,
        /// Force a specific agent instead of the routing table.
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// List tasks.
    List {
        /// Only tasks in this status.
        #[arg(short, long)]
        status: Option<String>,
        /// Sort by priority instead of creation time.
        #[arg(long)]
        by_priority: bool,
    },

    /// Show one task in full.
    Show {
        /// Task id.
        id: Uuid,
    },

    /// Deliver a result for an in-flight task.
    Ingest {
        /// Task id.
        id: Uuid,
        /// Result content.
        content: String,
        /// Record the result as a failure.
        #[arg(long)]
        fail: bool,
    },

    /// Return a done or failed task to pending.
    Retry {
        /// Task id.
        id: Uuid,
    },

    /// Cancel a task.
    Cancel {
        /// Task id.
        id: Uuid,
    },

    /// List known agents, rescanning the descriptor directory first.
    Agents,

    /// Probe agent liveness through the bridges.
    Ping {
        /// Agent name; probes every agent when omitted.
        name: Option<String>,
    },

    /// Drain the result inbox and poll stale tasks once.
    Pump,
}

fn parse_priority(s: &str) -> anyhow::Result<TaskPriority> {
    match s {
        "low" => Ok(TaskPriority::Low),
        "medium" => Ok(TaskPriority::Medium),
        "high" => Ok(TaskPriority::High),
        "critical" => Ok(TaskPriority::Critical),
        other => anyhow::bail!("unknown priority `{other}` (expected low|medium|high|critical)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let format = if cli.json {
        corral_telemetry::LogFormat::Json
    } else {
        corral_telemetry::LogFormat::Pretty
    };
    corral_telemetry::init("corral", &config.general.log_level, format);

    let coordinator = Coordinator::open(config).await?;

    match cli.command {
        None | Some(Commands::Stats) => {
            commands::stats::run(&coordinator)?;
        }
        Some(Commands::Create {
            title,
            description,
            priority,
            after,
        }) => {
            let priority = parse_priority(&priority)?;
            commands::task::create(&coordinator, title, description, priority, after).await?;
        }
        Some(Commands::Dispatch { id, agent }) => {
            commands::task::dispatch(&coordinator, id, agent.as_deref()).await?;
        }
        Some(Commands::List {
            status,
            by_priority,
        }) => {
            commands::task::list(&coordinator, status.as_deref(), by_priority)?;
        }
        Some(Commands::Show { id }) => {
            commands::task::show(&coordinator, id)?;
        }
        Some(Commands::Ingest { id, content, fail }) => {
            commands::task::ingest(&coordinator, id, content, fail).await?;
        }
        Some(Commands::Retry { id }) => {
            commands::task::retry(&coordinator, id).await?;
        }
        Some(Commands::Cancel { id }) => {
            commands::task::cancel(&coordinator, id).await?;
        }
        Some(Commands::Agents) => {
            commands::agent::list(&coordinator)?;
        }
        Some(Commands::Ping { name }) => {
            commands::agent::ping(&coordinator, name.as_deref()).await?;
        }
        Some(Commands::Pump) => {
            commands::pump::run(&coordinator).await?;
        }
    }

    Ok(())
}
