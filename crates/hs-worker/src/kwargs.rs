//! Declared training arguments and how local settings are turned into them.
//!
//! A [`TrainingSchema`] lists the keyword arguments a trainable accepts. Local
//! values come from an optional JSON config object, then from `--kebab-case
//! value` arguments, then from schema defaults. Names that are hyperparameters
//! are left out: the coordinator supplies those for each trial.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::errors::KwargsError;
use crate::trainable::{Kwargs, TrialContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Float,
    Int,
    String,
    Bool,
}

impl ParamKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::String => "string",
            Self::Bool => "bool",
        }
    }

    fn parse(&self, name: &str, raw: &str) -> Result<Value, KwargsError> {
        let invalid = || KwargsError::InvalidValue {
            name: name.to_string(),
            expected: self.label().to_string(),
            value: raw.to_string(),
        };
        match self {
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
            Self::Int => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Bool => match raw {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
        }
    }

    fn coerce(&self, name: &str, value: &Value) -> Result<Value, KwargsError> {
        let accepted = match self {
            Self::Float => value.is_number(),
            Self::Int => value.is_i64(),
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
        };
        if accepted {
            Ok(value.clone())
        } else {
            Err(KwargsError::InvalidValue {
                name: name.to_string(),
                expected: self.label().to_string(),
                value: value.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSchema {
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl TrainingSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required argument.
    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Add an argument with a default value.
    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        default: Value,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, KwargsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KwargsError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Build the local kwargs for this schema.
    ///
    /// `hyperparameters` are accepted in `config` and `args` but dropped from
    /// the result. Unknown names and required arguments without a value are
    /// errors.
    pub fn read_kwargs(
        &self,
        config: Option<&serde_json::Map<String, Value>>,
        args: &[String],
        hyperparameters: &[String],
    ) -> Result<Kwargs, KwargsError> {
        let is_hyperparameter = |name: &str| hyperparameters.iter().any(|h| h == name);
        let mut kwargs = Kwargs::new();

        if let Some(config) = config {
            for (name, value) in config {
                if is_hyperparameter(name) {
                    continue;
                }
                let spec = self.lookup(name)?;
                kwargs.insert(name.clone(), spec.kind.coerce(name, value)?);
            }
        }

        for (name, raw) in split_args(args, |name| {
            self.get(name).map(|s| s.kind == ParamKind::Bool).unwrap_or(false)
        })? {
            if is_hyperparameter(&name) {
                continue;
            }
            let spec = self.lookup(&name)?;
            let value = spec.kind.parse(&name, &raw)?;
            kwargs.insert(name, value);
        }

        for spec in &self.parameters {
            if is_hyperparameter(&spec.name) || kwargs.contains_key(&spec.name) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    kwargs.insert(spec.name.clone(), default.clone());
                }
                None => {
                    return Err(KwargsError::Missing {
                        name: spec.name.clone(),
                    })
                }
            }
        }

        Ok(kwargs)
    }

    fn lookup(&self, name: &str) -> Result<&ParamSpec, KwargsError> {
        self.get(name).ok_or_else(|| KwargsError::Unknown {
            name: name.to_string(),
        })
    }
}

/// Split `--kebab-name value`, `--kebab-name=value` and bare boolean flags
/// into `(snake_name, raw_value)` pairs.
fn split_args<F>(args: &[String], is_flag: F) -> Result<Vec<(String, String)>, KwargsError>
where
    F: Fn(&str) -> bool,
{
    let mut pairs = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let body = arg
            .strip_prefix("--")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| KwargsError::Malformed(format!("expected --name, got {arg}")))?;

        let (key, inline) = match body.split_once('=') {
            Some((k, v)) => (k, Some(v.to_string())),
            None => (body, None),
        };
        let name = key.replace('-', "_");

        let raw = match inline {
            Some(v) => v,
            None if is_flag(&name) && iter.peek().map_or(true, |n| n.starts_with("--")) => {
                "true".to_string()
            }
            None => iter
                .next()
                .cloned()
                .ok_or_else(|| KwargsError::Malformed(format!("{arg} needs a value")))?,
        };
        pairs.push((name, raw));
    }

    Ok(pairs)
}

/// Copy of `kwargs` with trial placeholders in string values expanded.
pub fn expand_placeholders(kwargs: &Kwargs, ctx: &TrialContext) -> Kwargs {
    kwargs
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => Value::String(ctx.expand(s)),
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn hps() -> Vec<String> {
        args(&["learning_rate", "batch_size"])
    }

    fn schema() -> TrainingSchema {
        TrainingSchema::new()
            .param("learning_rate", ParamKind::Float)
            .param("batch_size", ParamKind::Int)
            .param("hidden_dim", ParamKind::Int)
    }

    #[test]
    fn hyperparameters_are_excluded() {
        let kwargs = schema()
            .read_kwargs(None, &args(&["--hidden-dim", "128"]), &hps())
            .unwrap();
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs["hidden_dim"], json!(128));
    }

    #[test]
    fn hyperparameters_in_local_sources_are_ignored() {
        let config = json!({"learning_rate": "not even a number", "hidden_dim": 64});
        let kwargs = schema()
            .read_kwargs(
                config.as_object(),
                &args(&["--batch-size", "7", "--hidden-dim=256"]),
                &hps(),
            )
            .unwrap();
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs["hidden_dim"], json!(256));
    }

    #[test]
    fn defaults_and_flags() {
        let schema = TrainingSchema::new()
            .param_with_default("epochs", ParamKind::Int, json!(10))
            .param_with_default("verbose", ParamKind::Bool, json!(false))
            .param_with_default("optimizer", ParamKind::String, json!("adam"))
            .param("dropout", ParamKind::Float);

        let kwargs = schema
            .read_kwargs(None, &args(&["--verbose", "--dropout", "0.1"]), &[])
            .unwrap();
        assert_eq!(kwargs["epochs"], json!(10));
        assert_eq!(kwargs["verbose"], json!(true));
        assert_eq!(kwargs["optimizer"], json!("adam"));
        assert_eq!(kwargs["dropout"], json!(0.1));
    }

    #[test]
    fn schema_violations() {
        let err = schema().read_kwargs(None, &args(&["--depth", "3"]), &hps());
        assert!(matches!(err, Err(KwargsError::Unknown { name }) if name == "depth"));

        let err = schema().read_kwargs(None, &[], &hps());
        assert!(matches!(err, Err(KwargsError::Missing { name }) if name == "hidden_dim"));

        let err = schema().read_kwargs(None, &args(&["--hidden-dim", "wide"]), &hps());
        assert!(matches!(err, Err(KwargsError::InvalidValue { .. })));

        let err = schema().read_kwargs(None, &args(&["--hidden-dim"]), &hps());
        assert!(matches!(err, Err(KwargsError::Malformed(_))));

        let err = schema().read_kwargs(None, &args(&["hidden-dim", "3"]), &hps());
        assert!(matches!(err, Err(KwargsError::Malformed(_))));

        let config = json!({"hidden_dim": 1.5});
        let err = schema().read_kwargs(config.as_object(), &[], &hps());
        assert!(matches!(err, Err(KwargsError::InvalidValue { .. })));
    }

    #[test]
    fn schema_from_json() {
        let schema = TrainingSchema::from_json(
            r#"{"parameters": [
                {"name": "hidden_dim", "type": "int"},
                {"name": "log_file", "type": "string", "default": "train.log"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(schema.get("hidden_dim").unwrap().kind, ParamKind::Int);
        assert_eq!(schema.get("log_file").unwrap().default, Some(json!("train.log")));
    }

    #[test]
    fn placeholders_follow_the_trial() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("log_file".into(), json!("${HS_WORKER_ID}-${HS_TRIAL_ID}.log"));
        kwargs.insert("hidden_dim".into(), json!(8));

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let a = expand_placeholders(&kwargs, &TrialContext::new("w", first));
        let b = expand_placeholders(&kwargs, &TrialContext::new("w", second));
        assert_eq!(a["log_file"], json!(format!("w-{first}.log")));
        assert_eq!(b["log_file"], json!(format!("w-{second}.log")));
        assert_eq!(a["hidden_dim"], json!(8));
    }
}
