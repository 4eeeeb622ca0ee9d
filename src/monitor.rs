use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::downloader::{QueueEngine, Snapshot};
use crate::track::{RunStatus, Track};

pub const TICK: Duration = Duration::from_secs(1);

/// What observers receive on every tick.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    #[serde(rename = "Data")]
    pub tracks: Vec<Track>,
    #[serde(rename = "Status")]
    pub status: RunStatus,
    #[serde(rename = "Percent_Completion")]
    pub percent_completion: f64,
}

impl From<Snapshot> for ProgressReport {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            percent_completion: snapshot.percent_completion(),
            status: snapshot.status,
            tracks: snapshot.tracks,
        }
    }
}

pub trait SnapshotSink: Send + Sync {
    fn emit(&self, report: ProgressReport);
}

impl SnapshotSink for broadcast::Sender<Arc<ProgressReport>> {
    fn emit(&self, report: ProgressReport) {
        // no subscribers is fine
        let _ = self.send(Arc::new(report));
    }
}

/// Polls the engine and pushes a report to the sink until stopped.
pub struct ProgressMonitor {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub fn start(engine: QueueEngine, sink: Arc<dyn SnapshotSink>, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn({
            let stop = stop.clone();
            async move {
                debug!("Progress monitor started");
                loop {
                    sink.emit(engine.snapshot().into());
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                debug!("Progress monitor stopped");
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Stops the loop and waits for it to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
