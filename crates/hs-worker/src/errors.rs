use hs_types::SearchError;
use std::path::PathBuf;
use thiserror::Error;

/// A training reference that could not be turned into a [`crate::Trainable`].
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No trainable registered as {reference}")]
    Unregistered { reference: String },

    #[error("Training script not found: {reference}")]
    NotFound { reference: String },

    #[error("No `from <module> import <name>` declaration in {}", path.display())]
    MissingImport { path: PathBuf },

    #[error("{count} import declarations in {}, expected exactly one", path.display())]
    AmbiguousImport { path: PathBuf, count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local training arguments that do not fit the declared schema.
#[derive(Error, Debug)]
pub enum KwargsError {
    #[error("Unknown training argument: {name}")]
    Unknown { name: String },

    #[error("Missing value for required training argument: {name}")]
    Missing { name: String },

    #[error("Invalid value for {name}: expected {expected}, got {value}")]
    InvalidValue {
        name: String,
        expected: String,
        value: String,
    },

    #[error("Malformed argument list: {0}")]
    Malformed(String),

    #[error("Invalid schema or config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raised while running one trial of the user's training function.
#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Training failed: {0}")]
    Failed(String),

    #[error("Could not launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Training command exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("Training produced unusable metrics: {0}")]
    InvalidOutput(String),

    #[error("Training task panicked: {0}")]
    Panicked(String),
}

/// Errors talking to the coordinator.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Coordinator refused admission: {0}")]
    AdmissionRejected(String),

    #[error("Coordinator declined request ({status}): {message}")]
    Declined { status: u16, message: String },

    #[error("Objective {name} missing from reported metrics")]
    MissingObjective { name: String },

    #[error("Malformed coordinator response: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Search(SearchError),
}

impl TransportError {
    pub fn is_admission_rejected(&self) -> bool {
        matches!(self, Self::AdmissionRejected(_))
    }
}

impl From<SearchError> for TransportError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::AdmissionRejected { .. } => Self::AdmissionRejected(err.to_string()),
            other => Self::Search(other),
        }
    }
}

/// Anything that ends a worker loop early.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Kwargs(#[from] KwargsError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The worker was evicted; carries the failure that used up its budget.
    #[error("Worker evicted after trial {trial_id} failed: {source}")]
    Training {
        trial_id: String,
        #[source]
        source: TrainingError,
    },
}

pub type WorkerResult<T> = Result<T, WorkerError>;
