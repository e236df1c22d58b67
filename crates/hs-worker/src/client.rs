//! The worker loop: fetch a trial, train, report, repeat until exhausted.

use hs_types::TrialOffer;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{TrainingError, WorkerError, WorkerResult};
use crate::kwargs::expand_placeholders;
use crate::trainable::{Kwargs, Metrics, Trainable, TrialContext};
use crate::transport::CoordinatorApi;

/// Local inputs for the training function, checked against its schema.
#[derive(Debug, Clone, Default)]
pub struct LocalArgs {
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
    pub args: Vec<String>,
}

pub struct WorkerClient<C> {
    api: C,
    worker_id: String,
}

impl<C: CoordinatorApi> WorkerClient<C> {
    /// A client identified by `worker_id`, or a fresh random id.
    pub fn new(api: C, worker_id: Option<String>) -> Self {
        let worker_id = worker_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Self { api, worker_id }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// Run trials until the coordinator has nothing left for this worker.
    ///
    /// Returns the metrics of every completed trial in order. A failed trial
    /// is cancelled and the loop carries on with the next offer; if the
    /// cancellation evicts the worker, the training failure is returned.
    pub async fn run(
        &self,
        trainable: Arc<dyn Trainable>,
        local: &LocalArgs,
    ) -> WorkerResult<Vec<Metrics>> {
        let hyperparameters = self.api.hyperparameters().await?;
        let kwargs = trainable
            .schema()
            .read_kwargs(local.config.as_ref(), &local.args, &hyperparameters)?;

        let mut next = self.api.start(&self.worker_id).await?;
        if next.is_none() {
            info!(worker_id = %self.worker_id, "search already exhausted");
        }

        let mut results = Vec::new();
        while let Some(offer) = next {
            let trial_id = offer.trial_id;
            info!(worker_id = %self.worker_id, trial_id = %trial_id, "training trial");

            next = match self.train(&trainable, &kwargs, offer).await {
                Ok(metrics) => {
                    let following = self.api.complete(&trial_id, &self.worker_id, &metrics).await?;
                    results.push(metrics);
                    following
                }
                Err(err) => {
                    warn!(worker_id = %self.worker_id, trial_id = %trial_id, error = %err, "trial failed, cancelling");
                    match self.api.cancel(&self.worker_id).await? {
                        Some(offer) => Some(offer),
                        None => {
                            return Err(WorkerError::Training {
                                trial_id: trial_id.to_string(),
                                source: err,
                            })
                        }
                    }
                }
            };
        }

        info!(worker_id = %self.worker_id, trials = results.len(), "search exhausted, worker done");
        Ok(results)
    }

    async fn train(
        &self,
        trainable: &Arc<dyn Trainable>,
        kwargs: &Kwargs,
        offer: TrialOffer,
    ) -> Result<Metrics, TrainingError> {
        let ctx = TrialContext::new(&self.worker_id, offer.trial_id);
        let mut call = expand_placeholders(kwargs, &ctx);
        call.extend(offer.values.iter().map(|(k, v)| (k.clone(), v.to_json())));

        let trainable = Arc::clone(trainable);
        let metrics = tokio::task::spawn_blocking(move || trainable.invoke(&call, &ctx))
            .await
            .map_err(|e| TrainingError::Panicked(e.to_string()))??;

        check_metrics(metrics)
    }
}

fn check_metrics(metrics: Metrics) -> Result<Metrics, TrainingError> {
    if metrics.is_empty() {
        return Err(TrainingError::InvalidOutput("no metrics returned".to_string()));
    }
    if let Some((name, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(TrainingError::InvalidOutput(format!("{name} = {value}")));
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kwargs::{ParamKind, TrainingSchema};
    use crate::trainable::FnTrainable;
    use crate::transport::LocalCoordinator;
    use hs_optimizer::{HyperparameterSpace, SearchConfig, SearchCoordinator};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(max_trials: usize) -> Arc<SearchCoordinator> {
        let space = HyperparameterSpace::new()
            .add_log_float("learning_rate", 5e-6, 5e-4)
            .add_choice("batch_size", vec![json!(32), json!(64), json!(128)]);
        let config = SearchConfig::new("val_loss", max_trials).with_seed(11);
        Arc::new(SearchCoordinator::new(config, space).unwrap())
    }

    #[tokio::test]
    async fn runs_until_exhausted() {
        let coord = coordinator(6);
        let client = WorkerClient::new(LocalCoordinator::new(coord.clone()), Some("w".into()));
        let schema = TrainingSchema::new().param("hidden_dim", ParamKind::Int);
        let trainable = Arc::new(FnTrainable::new(schema, |kwargs, _| {
            assert_eq!(kwargs["hidden_dim"], json!(128));
            let batch = kwargs["batch_size"].as_i64().unwrap();
            assert!([32, 64, 128].contains(&batch));
            Ok(Metrics::from([(
                "val_loss".to_string(),
                kwargs["learning_rate"].as_f64().unwrap(),
            )]))
        }));
        let local = LocalArgs {
            config: None,
            args: vec!["--hidden-dim".into(), "128".into()],
        };

        let results = client.run(trainable, &local).await.unwrap();
        assert_eq!(results.len(), 6);
        for metrics in &results {
            assert!((5e-6..=5e-4).contains(&metrics["val_loss"]));
        }
        assert_eq!(coord.summary().trials_completed, 6);
    }

    #[tokio::test]
    async fn recovers_from_occasional_failures() {
        let coord = coordinator(4);
        let client = WorkerClient::new(LocalCoordinator::new(coord.clone()), Some("w".into()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let trainable = Arc::new(FnTrainable::new(TrainingSchema::new(), move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(TrainingError::Failed("flaky".into()));
            }
            Ok(Metrics::from([("val_loss".to_string(), 1.0)]))
        }));

        let results = client.run(trainable, &LocalArgs::default()).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        let summary = coord.summary();
        assert_eq!(summary.trials_completed, 4);
        assert_eq!(summary.trials_cancelled, 4);
    }

    #[tokio::test]
    async fn eviction_reraises_training_failure() {
        let coord = coordinator(20);
        let client = WorkerClient::new(LocalCoordinator::new(coord.clone()), Some("bad".into()));
        let trainable = Arc::new(FnTrainable::new(TrainingSchema::new(), |_, _| {
            Err(TrainingError::Failed("out of memory".into()))
        }));

        let err = client.run(trainable, &LocalArgs::default()).await.unwrap_err();
        match err {
            WorkerError::Training { source, .. } => {
                assert!(source.to_string().contains("out of memory"))
            }
            other => panic!("expected eviction, got {other:?}"),
        }
        let session = coord.session("bad").unwrap();
        assert!(session.evicted);
        assert_eq!(session.failure_count, 5);
        assert_eq!(coord.created_count(), 0);
    }

    #[tokio::test]
    async fn schema_errors_stop_before_any_trial() {
        let coord = coordinator(3);
        let client = WorkerClient::new(LocalCoordinator::new(coord.clone()), None);
        let trainable = Arc::new(FnTrainable::new(
            TrainingSchema::new().param("hidden_dim", ParamKind::Int),
            |_, _| Ok(Metrics::new()),
        ));

        let err = client.run(trainable, &LocalArgs::default()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Kwargs(_)));
        assert_eq!(coord.created_count(), 0);
        assert_eq!(client.worker_id().len(), 32);
    }

    #[test]
    fn unusable_metrics() {
        assert!(check_metrics(Metrics::new()).is_err());
        assert!(check_metrics(Metrics::from([("val_loss".to_string(), f64::INFINITY)])).is_err());
        assert!(check_metrics(Metrics::from([("val_loss".to_string(), 0.0)])).is_ok());
    }
}
