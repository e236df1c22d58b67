//! Orderly end of a search process.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, bail};
use hs_optimizer::SearchCoordinator;
use tracing::info;

/// Drop the last coordinator handle and wait for the exporter thread to
/// write out every event it was sent.
///
/// Fails instead of blocking when some other part of the process still
/// holds the coordinator, since the export channel would never close.
pub async fn finish_export(
    coordinator: Arc<SearchCoordinator>,
    exporter: JoinHandle<()>,
) -> anyhow::Result<()> {
    let Some(coordinator) = Arc::into_inner(coordinator) else {
        bail!("coordinator is still shared, export cannot be flushed");
    };
    drop(coordinator);

    tokio::task::spawn_blocking(move || exporter.join())
        .await?
        .map_err(|_| anyhow!("exporter thread panicked"))?;
    info!("export flushed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoordinatorService;
    use hs_optimizer::{spawn_exporter, HyperparameterSpace, SearchConfig, SearchSummary};
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn coordinator_with_export(dir: &std::path::Path) -> (Arc<SearchCoordinator>, JoinHandle<()>) {
        let (sink, exporter) = spawn_exporter(dir).unwrap();
        let space = HyperparameterSpace::new().add_float("x", 0.0, 1.0);
        let coord = SearchCoordinator::new(SearchConfig::new("val_loss", 2).with_seed(5), space)
            .unwrap()
            .with_event_sink(sink);
        (Arc::new(coord), exporter)
    }

    #[tokio::test]
    async fn export_flushed_after_service_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, exporter) = coordinator_with_export(dir.path());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(CoordinatorService::new(coord.clone()).serve_with_shutdown(
            listener,
            async {
                let _ = stopped.await;
            },
        ));

        let trial_id = coord.register_worker("w").unwrap().trial_id().unwrap();
        coord
            .complete_trial(&trial_id, 0.3, HashMap::new(), "w")
            .unwrap();

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
        finish_export(coord, exporter).await.unwrap();

        assert!(dir
            .path()
            .join("trials")
            .join(format!("{trial_id}.json"))
            .exists());
        let summary: SearchSummary =
            serde_json::from_slice(&std::fs::read(dir.path().join("search.json")).unwrap())
                .unwrap();
        assert_eq!(summary.trials_completed, 1);
        assert_eq!(summary.trials_running, 1);
    }

    #[tokio::test]
    async fn shared_coordinator_is_not_awaited() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, exporter) = coordinator_with_export(dir.path());
        let held = coord.clone();

        assert!(finish_export(coord, exporter).await.is_err());
        drop(held);
    }
}
