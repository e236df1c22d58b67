//! Result export: a background thread that mirrors search events to disk.
//!
//! The coordinator never touches the filesystem itself; it sends snapshots
//! over a channel and the exporter writes them out:
//!
//! ```text
//! <output_dir>/<project_name>/search.json
//! <output_dir>/<project_name>/trials/<trial_id>.json
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use hs_types::SearchResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::trial::{SearchSummary, Trial};

/// Snapshot emitted by the coordinator after a state change.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Trial(Trial),
    Summary(SearchSummary),
}

/// Writes trial and summary snapshots as pretty-printed JSON.
#[derive(Debug)]
pub struct TrialExporter {
    project_dir: PathBuf,
}

impl TrialExporter {
    pub fn new<P: AsRef<Path>>(project_dir: P) -> SearchResult<Self> {
        let project_dir = project_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(project_dir.join("trials"))?;

        Ok(Self { project_dir })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn trial_path(&self, trial: &Trial) -> PathBuf {
        self.project_dir
            .join("trials")
            .join(format!("{}.json", trial.id))
    }

    pub fn write(&self, event: &SearchEvent) -> SearchResult<()> {
        match event {
            SearchEvent::Trial(trial) => write_json(&self.trial_path(trial), trial),
            SearchEvent::Summary(summary) => {
                write_json(&self.project_dir.join("search.json"), summary)
            }
        }
    }

    /// Drain `events` on a dedicated thread until every sender is dropped.
    pub fn spawn(self, events: Receiver<SearchEvent>) -> SearchResult<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("hs-exporter".to_string())
            .spawn(move || {
                for event in events {
                    if let Err(e) = self.write(&event) {
                        warn!(error = %e, dir = %self.project_dir.display(), "failed to export search event");
                    }
                }
                debug!("exporter channel closed");
            })?;
        Ok(handle)
    }
}

/// Create an exporter for `project_dir` and return the sender to wire into
/// [`crate::SearchCoordinator::with_event_sink`].
pub fn spawn_exporter<P: AsRef<Path>>(
    project_dir: P,
) -> SearchResult<(Sender<SearchEvent>, JoinHandle<()>)> {
    let exporter = TrialExporter::new(project_dir)?;
    let (tx, rx) = unbounded();
    let handle = exporter.spawn(rx)?;
    Ok((tx, handle))
}

/// Write through a temp file so readers never see a half-written document.
fn write_json<T: Serialize>(path: &Path, value: &T) -> SearchResult<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
