mod cluster;

use clap::{Parser, Subcommand};
use cluster::{schedule_pending, ClusterState};
use starbug_scheduler::SchedulerConfig;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "starbug", about = "Starbug pod scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule the pending pods of a cluster state file
    Schedule {
        /// YAML or JSON file with nodes, pods and persistentVolumeClaims
        #[arg(long)]
        cluster: PathBuf,
        /// Scheduler configuration; defaults apply when omitted
        #[arg(long, env = "STARBUG_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Validate a scheduler configuration file
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Schedule { cluster, config } => run_schedule(&cluster, config.as_deref()).await,
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

async fn run_schedule(cluster: &Path, config: Option<&Path>) -> miette::Result<()> {
    let config = match config {
        Some(path) => load_config(path)?,
        None => SchedulerConfig::default(),
    };
    let state = ClusterState::from_file(cluster)?;
    info!(
        "Loaded {} node(s) and {} pod(s) from {}",
        state.nodes.len(),
        state.pods.len(),
        cluster.display()
    );

    let placements = schedule_pending(state, &config)
        .await
        .map_err(|e| miette::miette!("Scheduling failed: {}", e))?;

    let mut unscheduled = 0;
    for placement in &placements {
        match &placement.outcome {
            Ok(result) => println!(
                "{} -> {} ({} evaluated, {} feasible)",
                placement.pod, result.suggested_host, result.evaluated_nodes, result.feasible_nodes
            ),
            Err(e) => {
                unscheduled += 1;
                println!("{} unschedulable: {}", placement.pod, e);
            }
        }
    }

    info!(
        "Scheduled {} of {} pod(s)",
        placements.len() - unscheduled,
        placements.len()
    );
    Ok(())
}

fn run_check_config(path: &Path) -> miette::Result<()> {
    let config = load_config(path)?;
    println!(
        "{}: ok (profile {}, {} extender(s))",
        path.display(),
        config.profile.name,
        config.extenders.len()
    );
    Ok(())
}

fn load_config(path: &Path) -> miette::Result<SchedulerConfig> {
    SchedulerConfig::from_file(path)
        .map_err(|e| miette::miette!("Invalid configuration '{}': {}", path.display(), e))
}
