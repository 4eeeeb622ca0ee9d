use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::downloader::{QueueEngine, Snapshot};
use crate::monitor::{ProgressMonitor, ProgressReport, SnapshotSink, TICK};
use crate::track::TrackDescriptor;

/// Renders aggregate progress on a terminal bar.
struct BarSink(ProgressBar);

impl SnapshotSink for BarSink {
    fn emit(&self, report: ProgressReport) {
        let done = report.tracks.iter().filter(|t| t.status.is_terminal()).count();
        self.0.set_position(report.percent_completion.round() as u64);
        self.0
            .set_message(format!("{} | {}/{} tracks", report.status, done, report.tracks.len()));
    }
}

pub fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")?
            .progress_chars("█▓░"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// Reads a JSON array of track descriptors.
pub fn load_tracks(path: &Path) -> Result<Vec<TrackDescriptor>> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("invalid track list in {}", path.display()))
}

/// Runs `tracks` to the end, stopping early on Ctrl-C.
pub async fn fetch(
    engine: QueueEngine,
    tracks: Vec<TrackDescriptor>,
    bar: ProgressBar,
) -> Result<Snapshot> {
    let count = engine.enqueue(tracks);
    info!("Fetching {} track(s)", count);

    let mut status = engine.subscribe();
    let sink = Arc::new(BarSink(bar.clone()));
    let monitor = ProgressMonitor::start(engine.clone(), sink.clone(), TICK);
    engine.start();

    let mut interrupted = false;
    loop {
        tokio::select! {
            finished = status.wait_for(|s| s.is_terminal()) => {
                finished?;
                break;
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, stopping run");
                interrupted = true;
                engine.request_stop();
            }
        }
    }
    monitor.join().await;

    let snapshot = engine.snapshot();
    sink.emit(snapshot.clone().into());
    bar.finish();
    Ok(snapshot)
}

/// Per-status track counts, e.g. `Processing Complete: 3`.
pub fn summary(snapshot: &Snapshot) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for track in &snapshot.tracks {
        *counts.entry(track.status.as_str()).or_default() += 1;
    }
    let mut lines = vec![format!("Run {}", snapshot.status)];
    lines.extend(counts.iter().map(|(status, n)| format!("  {}: {}", status, n)));
    lines.join("\n")
}
