//! Values and payloads exchanged between the coordinator and its workers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique trial identifier.
pub type TrialId = Uuid;

/// Query key naming the reporting worker on a completion report. Every other
/// key of that query is a metric, so no metric may use this name.
pub const WORKER_ID_PARAM: &str = "worker_id";

/// A concrete hyperparameter value produced by a search strategy.
///
/// Integers are tried before floats when decoding so that `32` arrives as
/// `Int(32)` rather than `Float(32.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Hyperparameter name to sampled value.
pub type ParameterSet = HashMap<String, ParameterValue>;

/// A trial handed to a worker: its id and the values it must train with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOffer {
    pub trial_id: TrialId,
    pub values: ParameterSet,
}

/// Response to `list hyperparameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterNames {
    pub hyperparameters: Vec<String>,
}

/// Wire form of "next piece of work".
///
/// A single shape covers both outcomes: an empty `id` with an empty map is the
/// exhausted sentinel, which is also what an evicted worker receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialPayload {
    pub id: String,
    #[serde(default)]
    pub hyperparameters: ParameterSet,
}

impl TrialPayload {
    pub fn exhausted() -> Self {
        Self {
            id: String::new(),
            hyperparameters: ParameterSet::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.id.is_empty()
    }

    /// Decode back into an offer. `Ok(None)` is the exhausted sentinel.
    pub fn into_offer(self) -> Result<Option<TrialOffer>, uuid::Error> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let trial_id = Uuid::parse_str(&self.id)?;
        Ok(Some(TrialOffer {
            trial_id,
            values: self.hyperparameters,
        }))
    }
}

impl From<TrialOffer> for TrialPayload {
    fn from(offer: TrialOffer) -> Self {
        Self {
            id: offer.trial_id.to_string(),
            hyperparameters: offer.values,
        }
    }
}

/// Response to `poll current trial`; empty `id` when the worker holds nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OngoingTrial {
    pub id: String,
}

impl From<Option<TrialId>> for OngoingTrial {
    fn from(trial_id: Option<TrialId>) -> Self {
        Self {
            id: trial_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }
}

/// Body returned with every declined request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_sentinel_shape() {
        let json = serde_json::to_value(TrialPayload::exhausted()).unwrap();
        assert_eq!(json, serde_json::json!({"id": "", "hyperparameters": {}}));

        let back: TrialPayload = serde_json::from_str(r#"{"id": ""}"#).unwrap();
        assert!(back.into_offer().unwrap().is_none());
    }

    #[test]
    fn integer_values_decode_as_int() {
        let payload: TrialPayload = serde_json::from_str(
            r#"{"id": "6f1c1f5e-8a41-4e51-9a55-1c4d1b1a2b3c",
                "hyperparameters": {"batch_size": 64, "learning_rate": 0.0001, "act": "relu"}}"#,
        )
        .unwrap();
        let offer = payload.into_offer().unwrap().unwrap();
        assert_eq!(offer.values["batch_size"], ParameterValue::Int(64));
        assert_eq!(offer.values["learning_rate"], ParameterValue::Float(0.0001));
        assert_eq!(
            offer.values["act"],
            ParameterValue::Json(serde_json::json!("relu"))
        );
    }

    #[test]
    fn malformed_trial_id_is_an_error() {
        let payload = TrialPayload {
            id: "not-a-uuid".into(),
            hyperparameters: ParameterSet::new(),
        };
        assert!(payload.into_offer().is_err());
    }

    #[test]
    fn ongoing_trial_from_option() {
        assert_eq!(OngoingTrial::from(None).id, "");
        let id = Uuid::new_v4();
        assert_eq!(OngoingTrial::from(Some(id)).id, id.to_string());
    }

    #[test]
    fn parameter_value_display() {
        assert_eq!(ParameterValue::Int(32).to_string(), "32");
        assert_eq!(ParameterValue::Json(serde_json::json!("adam")).to_string(), "adam");
        assert_eq!(ParameterValue::Float(0.5).as_f64(), Some(0.5));
    }
}
