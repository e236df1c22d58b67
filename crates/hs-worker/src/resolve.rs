//! Turning a training reference into a [`Trainable`].
//!
//! A reference is either `library:function`, looked up directly, or a path to
//! a script (or a program on `PATH`) whose source contains exactly one
//! top-level `from <library> import <function>` line naming the entry to use.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ResolutionError, TrainingError};
use crate::kwargs::TrainingSchema;
use crate::trainable::{FnTrainable, Kwargs, Metrics, Trainable, TrialContext};

static IMPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^from (?P<lib>[A-Za-z0-9_.]+) import (?P<func>[A-Za-z0-9_]+)[ \t]*$")
        .expect("import pattern is valid")
});

/// Trainables known to this process, keyed by `library:function`.
#[derive(Default)]
pub struct TrainableRegistry {
    entries: HashMap<String, Arc<dyn Trainable>>,
}

impl TrainableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the demo objectives under `hypersweep.demos`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "hypersweep.demos",
            "sphere",
            FnTrainable::new(TrainingSchema::new(), sphere),
        );
        registry
    }

    pub fn register<T>(&mut self, library: &str, function: &str, trainable: T) -> &mut Self
    where
        T: Trainable + 'static,
    {
        self.entries
            .insert(format!("{library}:{function}"), Arc::new(trainable));
        self
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn Trainable>, ResolutionError> {
        let key = if reference.contains(':') {
            reference.to_string()
        } else {
            let path = locate_script(reference)?;
            let (library, function) = import_declaration(&path)?;
            debug!(script = %path.display(), %library, %function, "resolved training import");
            format!("{library}:{function}")
        };

        self.entries
            .get(&key)
            .cloned()
            .ok_or(ResolutionError::Unregistered { reference: key })
    }
}

/// Find `reference` as a path, or as a program name on `PATH`.
pub fn locate_script(reference: &str) -> Result<PathBuf, ResolutionError> {
    let direct = Path::new(reference);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    if direct.components().count() == 1 {
        if let Some(paths) = std::env::var_os("PATH") {
            if let Some(found) = std::env::split_paths(&paths)
                .map(|dir| dir.join(reference))
                .find(|candidate| candidate.is_file())
            {
                return Ok(found);
            }
        }
    }

    Err(ResolutionError::NotFound {
        reference: reference.to_string(),
    })
}

/// The single `from X import Y` declaration in the script at `path`.
pub fn import_declaration(path: &Path) -> Result<(String, String), ResolutionError> {
    let source = std::fs::read_to_string(path)?;
    let mut found = IMPORT_DECL.captures_iter(&source);

    let first = found.next().ok_or_else(|| ResolutionError::MissingImport {
        path: path.to_path_buf(),
    })?;
    let extra = found.count();
    if extra > 0 {
        return Err(ResolutionError::AmbiguousImport {
            path: path.to_path_buf(),
            count: extra + 1,
        });
    }

    Ok((first["lib"].to_string(), first["func"].to_string()))
}

/// Sum of squares of every numeric argument, reported as `val_loss`.
fn sphere(kwargs: &Kwargs, _ctx: &TrialContext) -> Result<Metrics, TrainingError> {
    let loss = kwargs
        .values()
        .filter_map(|v| v.as_f64())
        .map(|x| x * x)
        .sum::<f64>();
    Ok(Metrics::from([("val_loss".to_string(), loss)]))
}
