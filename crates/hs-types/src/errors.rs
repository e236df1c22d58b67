use thiserror::Error;

/// Errors raised by the search coordinator and its state machine.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Too many parallel workers: {active} of {limit} slots are held")]
    AdmissionRejected { active: usize, limit: usize },

    #[error("Unknown trial: {trial_id}")]
    UnknownTrial { trial_id: String },

    #[error("Trial {trial_id} is not owned by worker {worker_id}")]
    NotOwner { trial_id: String, worker_id: String },

    #[error("Worker {worker_id} holds no active trial")]
    NoActiveTrial { worker_id: String },

    #[error("Invalid search space: {0}")]
    InvalidSpace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// True for state-machine violations that are reported back to the caller
    /// as a declined operation rather than treated as a server fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRejected { .. }
                | Self::UnknownTrial { .. }
                | Self::NotOwner { .. }
                | Self::NoActiveTrial { .. }
        )
    }
}

/// Result type alias for coordinator operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Macro for creating search-space validation errors
#[macro_export]
macro_rules! space_error {
    ($($arg:tt)*) => {
        $crate::SearchError::InvalidSpace(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SearchError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SearchError::AdmissionRejected { active: 4, limit: 4 };
        assert!(error.to_string().contains("Too many parallel workers"));
        assert!(error.to_string().contains("4 of 4"));

        let error = SearchError::NotOwner {
            trial_id: "abc".to_string(),
            worker_id: "w1".to_string(),
        };
        assert_eq!(error.to_string(), "Trial abc is not owned by worker w1");
    }

    #[test]
    fn test_rejection_classification() {
        assert!(SearchError::UnknownTrial { trial_id: "x".into() }.is_rejection());
        assert!(SearchError::NoActiveTrial { worker_id: "w".into() }.is_rejection());
        assert!(!SearchError::Config("bad".into()).is_rejection());
    }

    #[test]
    fn test_macros() {
        let err = space_error!("duplicate name: {}", "lr");
        assert!(matches!(err, SearchError::InvalidSpace(ref m) if m == "duplicate name: lr"));
        let err = config_error!("max_trials must be positive");
        assert!(matches!(err, SearchError::Config(_)));
    }
}
