use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use hs_worker::{
    CommandTrainable, HttpCoordinator, LocalArgs, Trainable, TrainableRegistry, TrainingSchema,
    WorkerClient,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hs-worker", about = "Run HyperSweep trials against a coordinator")]
#[command(group(ArgGroup::new("trainable").required(true).args(["train", "command"])))]
struct Cli {
    /// Coordinator address
    #[arg(long, env = "HS_URL", default_value = "http://localhost:5000")]
    url: String,

    /// Worker id; random when omitted
    #[arg(long)]
    worker_id: Option<String>,

    /// Training reference: `library:function` or a script declaring one import
    #[arg(long)]
    train: Option<String>,

    /// External program run once per trial
    #[arg(long)]
    command: Option<PathBuf>,

    /// JSON schema of the local training arguments
    #[arg(long)]
    schema: Option<PathBuf>,

    /// JSON object of local training arguments
    #[arg(long)]
    config: Option<PathBuf>,

    /// Training arguments, `--name value`, after `--`
    #[arg(last = true)]
    args: Vec<String>,
}

fn load_trainable(cli: &Cli) -> anyhow::Result<Arc<dyn Trainable>> {
    if let Some(reference) = &cli.train {
        let registry = TrainableRegistry::with_builtins();
        return Ok(registry.resolve(reference)?);
    }

    let schema = match &cli.schema {
        Some(path) => TrainingSchema::from_file(path)
            .with_context(|| format!("loading schema {}", path.display()))?,
        None => TrainingSchema::new(),
    };
    match &cli.command {
        Some(program) => Ok(Arc::new(CommandTrainable::new(program, schema))),
        None => bail!("one of --train or --command is required"),
    }
}

type JsonObject = serde_json::Map<String, serde_json::Value>;

fn load_config(path: Option<&Path>) -> anyhow::Result<Option<JsonObject>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    match serde_json::from_str(&text)? {
        serde_json::Value::Object(map) => Ok(Some(map)),
        _ => bail!("config {} must be a JSON object", path.display()),
    }
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

    let trainable = load_trainable(&cli)?;
    let local = LocalArgs {
        config: load_config(cli.config.as_deref())?,
        args: cli.args.clone(),
    };

    let client = WorkerClient::new(HttpCoordinator::new(&cli.url), cli.worker_id.clone());
    info!(worker_id = %client.worker_id(), url = %cli.url, "worker starting");

    let results = client.run(trainable, &local).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}
