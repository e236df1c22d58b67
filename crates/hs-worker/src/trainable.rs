//! The training capability a worker drives, and its two implementations:
//! an in-process closure and an external command.

use hs_types::TrialId;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::errors::TrainingError;
use crate::kwargs::TrainingSchema;

/// Metric name to value, as returned by one training run.
pub type Metrics = HashMap<String, f64>;

/// Keyword arguments for one training run: local settings merged with the
/// trial's hyperparameter values.
pub type Kwargs = BTreeMap<String, Value>;

pub const WORKER_ID_ENV: &str = "HS_WORKER_ID";
pub const TRIAL_ID_ENV: &str = "HS_TRIAL_ID";

/// Identifiers of the trial being trained. Rebuilt for every trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialContext {
    pub worker_id: String,
    pub trial_id: TrialId,
}

impl TrialContext {
    pub fn new(worker_id: &str, trial_id: TrialId) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            trial_id,
        }
    }

    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            (WORKER_ID_ENV, self.worker_id.clone()),
            (TRIAL_ID_ENV, self.trial_id.to_string()),
        ]
    }

    /// Replace `${HS_WORKER_ID}` and `${HS_TRIAL_ID}` in `text`.
    pub fn expand(&self, text: &str) -> String {
        self.env_vars()
            .iter()
            .fold(text.to_string(), |acc, (name, value)| {
                acc.replace(&format!("${{{name}}}"), value)
            })
    }
}

/// A user training function.
///
/// Implementations declare the local arguments they take through
/// [`Trainable::schema`]; hyperparameter values arrive in `kwargs` next to them.
pub trait Trainable: Send + Sync {
    fn schema(&self) -> &TrainingSchema;

    fn invoke(&self, kwargs: &Kwargs, ctx: &TrialContext) -> Result<Metrics, TrainingError>;
}

type TrainFn = dyn Fn(&Kwargs, &TrialContext) -> Result<Metrics, TrainingError> + Send + Sync;

/// In-process trainable backed by a closure.
pub struct FnTrainable {
    schema: TrainingSchema,
    func: Box<TrainFn>,
}

impl FnTrainable {
    pub fn new<F>(schema: TrainingSchema, func: F) -> Self
    where
        F: Fn(&Kwargs, &TrialContext) -> Result<Metrics, TrainingError> + Send + Sync + 'static,
    {
        Self {
            schema,
            func: Box::new(func),
        }
    }
}

impl Trainable for FnTrainable {
    fn schema(&self) -> &TrainingSchema {
        &self.schema
    }

    fn invoke(&self, kwargs: &Kwargs, ctx: &TrialContext) -> Result<Metrics, TrainingError> {
        (self.func)(kwargs, ctx)
    }
}

impl std::fmt::Debug for FnTrainable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTrainable")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Runs an external program once per trial.
///
/// Every kwarg is passed as `--kebab-name value`. The worker and trial ids are
/// exported as `HS_WORKER_ID` / `HS_TRIAL_ID`. The last non-empty stdout line
/// must be a JSON object of numeric metrics.
#[derive(Debug, Clone)]
pub struct CommandTrainable {
    program: PathBuf,
    leading_args: Vec<String>,
    schema: TrainingSchema,
}

impl CommandTrainable {
    pub fn new(program: impl Into<PathBuf>, schema: TrainingSchema) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            schema,
        }
    }

    /// Arguments placed before the generated `--name value` pairs,
    /// e.g. the script path when `program` is an interpreter.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command_args(&self, kwargs: &Kwargs) -> Vec<String> {
        let mut args = self.leading_args.clone();
        for (name, value) in kwargs {
            args.push(format!("--{}", name.replace('_', "-")));
            args.push(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        args
    }
}

impl Trainable for CommandTrainable {
    fn schema(&self) -> &TrainingSchema {
        &self.schema
    }

    fn invoke(&self, kwargs: &Kwargs, ctx: &TrialContext) -> Result<Metrics, TrainingError> {
        let args = self.command_args(kwargs);
        debug!(program = %self.program.display(), ?args, trial_id = %ctx.trial_id, "launching training command");

        let output = Command::new(&self.program)
            .args(&args)
            .envs(ctx.env_vars())
            .output()
            .map_err(|source| TrainingError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrainingError::ExitStatus {
                status: output.status.to_string(),
                stderr: tail(&stderr, 20),
            });
        }

        parse_metrics_line(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the last non-empty line of `stdout` as a metric map.
pub fn parse_metrics_line(stdout: &str) -> Result<Metrics, TrainingError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| TrainingError::InvalidOutput("no output".to_string()))?;

    let raw: serde_json::Map<String, Value> = serde_json::from_str(line)
        .map_err(|e| TrainingError::InvalidOutput(format!("{e}: {line}")))?;

    raw.into_iter()
        .map(|(name, value)| match value.as_f64() {
            Some(v) => Ok((name, v)),
            None => Err(TrainingError::InvalidOutput(format!(
                "metric {name} is not a number: {value}"
            ))),
        })
        .collect()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
