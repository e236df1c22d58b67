use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use hs_optimizer::{
    spawn_exporter, HyperparameterSpace, ObjectiveDirection, SearchConfig, SearchCoordinator,
};
use hs_server::{finish_export, CoordinatorService};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Minimize,
    Maximize,
}

impl From<Direction> for ObjectiveDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Minimize => ObjectiveDirection::Minimize,
            Direction::Maximize => ObjectiveDirection::Maximize,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hs-server", about = "HyperSweep search coordinator")]
struct Cli {
    /// JSON file describing the hyperparameter space
    #[arg(long, env = "HS_SPACE")]
    space: PathBuf,

    /// Address to listen on
    #[arg(long, env = "HS_ADDR", default_value = "0.0.0.0:5000")]
    addr: String,

    /// Name of the metric workers report
    #[arg(long, default_value = "val_loss")]
    objective: String,

    #[arg(long, value_enum, default_value = "minimize")]
    direction: Direction,

    /// Maximum number of trials for the whole search
    #[arg(long)]
    max_trials: usize,

    /// Maximum number of workers running trials simultaneously
    #[arg(long, default_value_t = 1)]
    max_parallel_workers: usize,

    /// Consecutive failures after which a worker is evicted
    #[arg(long, default_value_t = 5)]
    max_fails_per_worker: u32,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Directory in which to create the project directory for exported results
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value = "hypersweep")]
    project_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let space_json = std::fs::read_to_string(&cli.space)
        .with_context(|| format!("reading search space from {}", cli.space.display()))?;
    let space = HyperparameterSpace::from_json(&space_json)?;

    let mut config = SearchConfig::new(&cli.objective, cli.max_trials)
        .with_parallel_workers(cli.max_parallel_workers)
        .with_max_fails(cli.max_fails_per_worker)
        .with_direction(cli.direction.into());
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if let Some(output_dir) = &cli.output_dir {
        config = config.with_export(output_dir, &cli.project_name);
    }

    let mut coordinator = SearchCoordinator::new(config.clone(), space)?;
    let mut exporter = None;
    if let Some(project_dir) = config.project_dir() {
        let (sink, handle) = spawn_exporter(&project_dir)?;
        info!(dir = %project_dir.display(), "exporting results");
        coordinator = coordinator.with_event_sink(sink);
        exporter = Some(handle);
    }
    let coordinator = Arc::new(coordinator);

    let listener = TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("binding {}", cli.addr))?;
    CoordinatorService::new(coordinator.clone())
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    if let Some(exporter) = exporter {
        finish_export(coordinator, exporter).await?;
    }
    Ok(())
}
