//! Hyperparameter space definitions and sampling strategies.

use hs_types::{space_error, ParameterSet, ParameterValue, SearchResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Hyperparameter name (e.g. "learning_rate").
    pub name: String,
    /// How the value is sampled.
    #[serde(flatten)]
    pub kind: ParameterKind,
}

/// Describes how a hyperparameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous range [low, high]; uniform in log-space when `log_scale`.
    Float {
        low: f64,
        high: f64,
        #[serde(default)]
        log_scale: bool,
    },
    /// Integer range [low, high] inclusive.
    Int { low: i64, high: i64 },
    /// One of an ordered set of options.
    Choice { options: Vec<serde_json::Value> },
}

/// The full search space: an ordered list of parameter definitions.
///
/// Definition order is the canonical order reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSpace {
    pub parameters: Vec<ParameterDef>,
}

impl HyperparameterSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Float {
                low,
                high,
                log_scale: false,
            },
        });
        self
    }

    pub fn add_log_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Float {
                low,
                high,
                log_scale: true,
            },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Int { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, options: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { options },
        });
        self
    }

    /// Load a space from its JSON form (a list of tagged parameter definitions).
    pub fn from_json(json: &str) -> SearchResult<Self> {
        let space: Self = serde_json::from_str(json)?;
        space.validate()?;
        Ok(space)
    }

    /// Hyperparameter names in definition order.
    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.parameters.is_empty() {
            return Err(space_error!("search space has no parameters"));
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(space_error!("duplicate parameter name: {}", param.name));
            }
            match &param.kind {
                ParameterKind::Float {
                    low,
                    high,
                    log_scale,
                } => {
                    if !low.is_finite() || !high.is_finite() || low > high {
                        return Err(space_error!(
                            "{}: invalid float range [{low}, {high}]",
                            param.name
                        ));
                    }
                    if *log_scale && *low <= 0.0 {
                        return Err(space_error!(
                            "{}: log-scale range must be strictly positive",
                            param.name
                        ));
                    }
                    let width = if *log_scale {
                        high.ln() - low.ln()
                    } else {
                        high - low
                    };
                    // the sampler divides the width by a factor just below one
                    if !width.is_finite() || width > f64::MAX / 2.0 {
                        return Err(space_error!(
                            "{}: float range [{low}, {high}] is too wide to sample",
                            param.name
                        ));
                    }
                }
                ParameterKind::Int { low, high } => {
                    if low > high {
                        return Err(space_error!(
                            "{}: invalid int range [{low}, {high}]",
                            param.name
                        ));
                    }
                }
                ParameterKind::Choice { options } => {
                    if options.is_empty() {
                        return Err(space_error!("{}: choice has no options", param.name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Independently sample every dimension using the supplied random source.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterSet {
        let mut params = ParameterSet::with_capacity(self.parameters.len());

        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::Float {
                    low,
                    high,
                    log_scale: false,
                } => ParameterValue::Float(rng.gen_range(*low..=*high)),
                ParameterKind::Float {
                    low,
                    high,
                    log_scale: true,
                } => {
                    let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                    // exp(ln(x)) can land one ulp outside the range
                    ParameterValue::Float(log_val.exp().clamp(*low, *high))
                }
                ParameterKind::Int { low, high } => {
                    ParameterValue::Int(rng.gen_range(*low..=*high))
                }
                ParameterKind::Choice { options } => {
                    let idx = rng.gen_range(0..options.len());
                    match &options[idx] {
                        serde_json::Value::Number(n) if n.is_i64() => {
                            ParameterValue::Int(n.as_i64().unwrap_or_default())
                        }
                        other => ParameterValue::Json(other.clone()),
                    }
                }
            };
            params.insert(param.name.clone(), value);
        }

        params
    }
}

impl Default for HyperparameterSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Pluggable source of new trial configurations.
pub trait SearchStrategy: Send + Sync {
    /// Produce the hyperparameters for the next trial.
    fn suggest(&mut self) -> ParameterSet;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &ParameterSet, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: HyperparameterSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: HyperparameterSpace) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Reproducible sampling for tests and replays.
    pub fn with_seed(space: HyperparameterSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self) -> ParameterSet {
        self.space.sample(&mut self.rng)
    }

    fn name(&self) -> &str {
        "random"
    }
}
