//! How a worker reaches the coordinator.

use async_trait::async_trait;
use hs_optimizer::SearchCoordinator;
use hs_types::{
    ErrorBody, HyperparameterNames, OngoingTrial, TrialId, TrialOffer, TrialPayload,
    WORKER_ID_PARAM,
};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::TransportError;
use crate::trainable::Metrics;

/// The five coordinator operations, as seen from a worker.
///
/// `Ok(None)` from `start`, `complete` and `cancel` is the exhausted signal;
/// after a cancellation it means the worker has been evicted.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn hyperparameters(&self) -> Result<Vec<String>, TransportError>;

    async fn start(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError>;

    async fn ongoing(&self, worker_id: &str) -> Result<Option<TrialId>, TransportError>;

    async fn complete(
        &self,
        trial_id: &TrialId,
        worker_id: &str,
        metrics: &Metrics,
    ) -> Result<Option<TrialOffer>, TransportError>;

    async fn cancel(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError>;
}

/// Talks to a remote `hs-server` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCoordinator {
    /// `url` may omit the scheme (`localhost:5000`); `http://` is assumed.
    pub fn new(url: &str) -> Self {
        let url = url.trim_end_matches('/');
        let base_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "coordinator request");
        let resp = self.client.get(&url).query(query).send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::AdmissionRejected(format!(
                "{message} (coordinator at {})",
                self.base_url
            )));
        }
        Err(TransportError::Declined {
            status: status.as_u16(),
            message,
        })
    }

    async fn next_trial(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Option<TrialOffer>, TransportError> {
        let payload: TrialPayload = self.get(path, query).await?.json().await?;
        payload
            .into_offer()
            .map_err(|e| TransportError::Protocol(format!("bad trial id: {e}")))
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinator {
    async fn hyperparameters(&self) -> Result<Vec<String>, TransportError> {
        let names: HyperparameterNames = self.get("/hyperparameters", &[]).await?.json().await?;
        Ok(names.hyperparameters)
    }

    async fn start(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError> {
        self.next_trial(&format!("/start/{worker_id}"), &[]).await
    }

    async fn ongoing(&self, worker_id: &str) -> Result<Option<TrialId>, TransportError> {
        let ongoing: OngoingTrial = self
            .get(&format!("/ongoing/{worker_id}"), &[])
            .await?
            .json()
            .await?;
        if ongoing.id.is_empty() {
            return Ok(None);
        }
        Uuid::parse_str(&ongoing.id)
            .map(Some)
            .map_err(|e| TransportError::Protocol(format!("bad trial id: {e}")))
    }

    async fn complete(
        &self,
        trial_id: &TrialId,
        worker_id: &str,
        metrics: &Metrics,
    ) -> Result<Option<TrialOffer>, TransportError> {
        let query = report_query(worker_id, metrics);
        self.next_trial(&format!("/end/{trial_id}"), &query).await
    }

    async fn cancel(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError> {
        self.next_trial(&format!("/cancel/{worker_id}"), &[]).await
    }
}

/// Query for a completion report. A metric named like the worker id key
/// would overwrite it on the server, so it is left out.
fn report_query(worker_id: &str, metrics: &Metrics) -> Vec<(String, String)> {
    let mut query = vec![(WORKER_ID_PARAM.to_string(), worker_id.to_string())];
    for (name, value) in metrics {
        if name == WORKER_ID_PARAM {
            warn!(worker_id, metric = %name, "dropping metric that collides with the worker id key");
            continue;
        }
        query.push((name.clone(), value.to_string()));
    }
    query
}

/// Drives a coordinator living in the same process, without HTTP.
#[derive(Clone)]
pub struct LocalCoordinator {
    coordinator: Arc<SearchCoordinator>,
}

impl LocalCoordinator {
    pub fn new(coordinator: Arc<SearchCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl CoordinatorApi for LocalCoordinator {
    async fn hyperparameters(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.coordinator.hyperparameter_names())
    }

    async fn start(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError> {
        Ok(self.coordinator.register_worker(worker_id)?.offer().cloned())
    }

    async fn ongoing(&self, worker_id: &str) -> Result<Option<TrialId>, TransportError> {
        Ok(self.coordinator.current_trial(worker_id))
    }

    async fn complete(
        &self,
        trial_id: &TrialId,
        worker_id: &str,
        metrics: &Metrics,
    ) -> Result<Option<TrialOffer>, TransportError> {
        let name = &self.coordinator.config().objective;
        let objective = metrics
            .get(name)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TransportError::MissingObjective { name: name.clone() })?;
        let extra: HashMap<String, f64> = metrics
            .iter()
            .filter(|(k, v)| *k != name && v.is_finite())
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let next = self
            .coordinator
            .complete_trial(trial_id, objective, extra, worker_id)?;
        Ok(next.offer().cloned())
    }

    async fn cancel(&self, worker_id: &str) -> Result<Option<TrialOffer>, TransportError> {
        Ok(self.coordinator.cancel_trial(worker_id)?.offer().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_optimizer::{HyperparameterSpace, SearchConfig};

    fn local(max_trials: usize) -> LocalCoordinator {
        let space = HyperparameterSpace::new().add_float("x", 0.0, 1.0);
        let config = SearchConfig::new("val_loss", max_trials).with_seed(3);
        LocalCoordinator::new(Arc::new(SearchCoordinator::new(config, space).unwrap()))
    }

    #[test]
    fn url_normalisation() {
        assert_eq!(HttpCoordinator::new("localhost:5000").base_url(), "http://localhost:5000");
        assert_eq!(HttpCoordinator::new("https://hs.example/").base_url(), "https://hs.example");
    }

    #[test]
    fn report_query_keeps_worker_id() {
        let metrics = Metrics::from([
            ("val_loss".to_string(), 0.25),
            (WORKER_ID_PARAM.to_string(), 7.0),
        ]);
        let query = report_query("w1", &metrics);

        let ids: Vec<_> = query.iter().filter(|(k, _)| k == WORKER_ID_PARAM).collect();
        assert_eq!(ids, vec![&(WORKER_ID_PARAM.to_string(), "w1".to_string())]);
        assert!(query.contains(&("val_loss".to_string(), "0.25".to_string())));
        assert_eq!(query.len(), 2);
    }

    #[tokio::test]
    async fn local_round_trip() {
        let api = local(2);
        assert_eq!(api.hyperparameters().await.unwrap(), vec!["x"]);

        let first = api.start("w").await.unwrap().unwrap();
        assert_eq!(api.ongoing("w").await.unwrap(), Some(first.trial_id));

        let metrics = Metrics::from([("val_loss".to_string(), 0.5), ("acc".to_string(), 0.9)]);
        let second = api.complete(&first.trial_id, "w", &metrics).await.unwrap().unwrap();
        let done = api.complete(&second.trial_id, "w", &metrics).await.unwrap();
        assert!(done.is_none());
        assert_eq!(api.ongoing("w").await.unwrap(), None);
    }

    #[tokio::test]
    async fn local_requires_objective() {
        let api = local(2);
        let offer = api.start("w").await.unwrap().unwrap();

        let metrics = Metrics::from([("acc".to_string(), 0.9)]);
        let err = api.complete(&offer.trial_id, "w", &metrics).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingObjective { .. }));

        let metrics = Metrics::from([("val_loss".to_string(), f64::NAN)]);
        assert!(api.complete(&offer.trial_id, "w", &metrics).await.is_err());

        assert_eq!(api.ongoing("w").await.unwrap(), Some(offer.trial_id));
    }
}
