//! Request/response boundary over a shared [`SearchCoordinator`].
//!
//! Handlers validate input, delegate to the coordinator and translate its
//! outcomes to HTTP. They never sample or mutate search state themselves.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hs_optimizer::{SearchCoordinator, SearchSummary};
use hs_types::{
    ErrorBody, HyperparameterNames, OngoingTrial, SearchError, TrialPayload, WORKER_ID_PARAM,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failure signal returned to a client.
#[derive(Debug)]
pub enum ApiError {
    Search(SearchError),
    BadRequest(String),
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self::Search(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Search(err) => match err {
                SearchError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
                SearchError::UnknownTrial { .. } | SearchError::NoActiveTrial { .. } => {
                    StatusCode::NOT_FOUND
                }
                SearchError::NotOwner { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Search(err) = &self {
            if !err.is_rejection() {
                error!(error = %err, "coordinator request failed");
            }
        }
        let message = match self {
            Self::Search(err) => err.to_string(),
            Self::BadRequest(message) => message,
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// HTTP front end for one search.
#[derive(Clone)]
pub struct CoordinatorService {
    coordinator: Arc<SearchCoordinator>,
}

impl CoordinatorService {
    pub fn new(coordinator: Arc<SearchCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Routes:
    /// - `GET /hyperparameters`: ordered hyperparameter names
    /// - `GET /start/:worker_id`: admit a worker, first trial
    /// - `GET /ongoing/:worker_id`: trial currently held
    /// - `GET /end/:trial_id?worker_id=..&<objective>=..`: report, next trial
    /// - `GET /cancel/:worker_id`: give up the current trial, next trial
    /// - `GET /summary`, `GET /health`
    pub fn router(self) -> Router {
        Router::new()
            .route("/hyperparameters", get(hyperparameters_handler))
            .route("/start/:worker_id", get(start_handler))
            .route("/ongoing/:worker_id", get(ongoing_handler))
            .route("/end/:trial_id", get(end_handler))
            .route("/cancel/:worker_id", get(cancel_handler))
            .route("/summary", get(summary_handler))
            .route("/health", get(health_handler))
            .with_state(self.coordinator)
    }

    /// Serve on an already-bound listener until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "coordinator service listening");
        }
        axum::serve(listener, self.router()).await
    }

    /// Serve until `shutdown` resolves. In-flight requests are allowed to
    /// finish, and the router's coordinator handle is released on return.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "coordinator service listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("coordinator service stopped");
        Ok(())
    }
}

type SharedCoordinator = State<Arc<SearchCoordinator>>;

async fn hyperparameters_handler(State(coord): SharedCoordinator) -> Json<HyperparameterNames> {
    Json(HyperparameterNames {
        hyperparameters: coord.hyperparameter_names(),
    })
}

async fn start_handler(
    State(coord): SharedCoordinator,
    Path(worker_id): Path<String>,
) -> Result<Json<TrialPayload>, ApiError> {
    let assignment = coord.register_worker(&worker_id)?;
    Ok(Json(assignment.into_payload()))
}

async fn ongoing_handler(
    State(coord): SharedCoordinator,
    Path(worker_id): Path<String>,
) -> Json<OngoingTrial> {
    Json(coord.current_trial(&worker_id).into())
}

async fn end_handler(
    State(coord): SharedCoordinator,
    Path(trial_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<TrialPayload>, ApiError> {
    let objective_name = coord.config().objective.as_str();
    let report = parse_report(objective_name, params)?;

    let trial_id = Uuid::parse_str(&trial_id).map_err(|_| {
        warn!(trial_id = %trial_id, worker_id = %report.worker_id, "malformed trial id");
        SearchError::UnknownTrial {
            trial_id: trial_id.clone(),
        }
    })?;

    let assignment = coord.complete_trial(
        &trial_id,
        report.objective,
        report.metrics,
        &report.worker_id,
    )?;
    Ok(Json(assignment.into_payload()))
}

async fn cancel_handler(
    State(coord): SharedCoordinator,
    Path(worker_id): Path<String>,
) -> Result<Json<TrialPayload>, ApiError> {
    let assignment = coord.cancel_trial(&worker_id)?;
    Ok(Json(assignment.into_payload()))
}

async fn summary_handler(State(coord): SharedCoordinator) -> Json<SearchSummary> {
    Json(coord.summary())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// A parsed completion report.
#[derive(Debug, PartialEq)]
struct Report {
    worker_id: String,
    objective: f64,
    metrics: HashMap<String, f64>,
}

fn parse_report(objective_name: &str, mut params: HashMap<String, String>) -> Result<Report, ApiError> {
    let worker_id = params
        .remove(WORKER_ID_PARAM)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing query parameter `{WORKER_ID_PARAM}`")))?;

    let raw = params.remove(objective_name).ok_or_else(|| {
        ApiError::BadRequest(format!("missing objective `{objective_name}`"))
    })?;
    let objective = parse_metric(&raw).ok_or_else(|| {
        ApiError::BadRequest(format!("objective `{objective_name}` is not a finite number: {raw}"))
    })?;

    let mut metrics = HashMap::new();
    for (name, raw) in params {
        match parse_metric(&raw) {
            Some(value) => {
                metrics.insert(name, value);
            }
            None => debug!(metric = %name, value = %raw, "ignoring non-numeric metric"),
        }
    }

    Ok(Report {
        worker_id,
        objective,
        metrics,
    })
}

fn parse_metric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn report_parsing() {
        let report = parse_report(
            "val_loss",
            params(&[("worker_id", "w1"), ("val_loss", "1e-9"), ("accuracy", "0.93")]),
        )
        .unwrap();
        assert_eq!(report.worker_id, "w1");
        assert_eq!(report.objective, 1e-9);
        assert_eq!(report.metrics.get("accuracy"), Some(&0.93));
        assert!(!report.metrics.contains_key("val_loss"));
    }

    #[test]
    fn report_rejects_bad_objective() {
        for bad in ["abc", "NaN", "inf", ""] {
            let err = parse_report("val_loss", params(&[("worker_id", "w"), ("val_loss", bad)]));
            assert!(matches!(err, Err(ApiError::BadRequest(_))), "accepted {bad:?}");
        }
        assert!(matches!(
            parse_report("val_loss", params(&[("worker_id", "w")])),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse_report("val_loss", params(&[("val_loss", "0.1")])),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (
                ApiError::from(SearchError::AdmissionRejected { active: 1, limit: 1 }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError::from(SearchError::UnknownTrial { trial_id: "t".into() }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(SearchError::NotOwner {
                    trial_id: "t".into(),
                    worker_id: "w".into(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(SearchError::NoActiveTrial { worker_id: "w".into() }),
                StatusCode::NOT_FOUND,
            ),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn rejections_are_client_errors() {
        let errors = [
            SearchError::AdmissionRejected { active: 2, limit: 2 },
            SearchError::UnknownTrial { trial_id: "t".into() },
            SearchError::NotOwner {
                trial_id: "t".into(),
                worker_id: "w".into(),
            },
            SearchError::NoActiveTrial { worker_id: "w".into() },
            SearchError::Config("bad".into()),
            SearchError::InvalidSpace("bad".into()),
        ];
        for err in errors {
            let rejection = err.is_rejection();
            let status = ApiError::from(err).status();
            assert_eq!(status.is_client_error(), rejection, "{status}");
            assert_eq!(status.is_server_error(), !rejection, "{status}");
        }
    }
}
