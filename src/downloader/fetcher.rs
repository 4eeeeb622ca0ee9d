use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeSettings;
use crate::resolver::MediaRef;
use crate::track::{TrackDescriptor, TrackHandle, TrackStatus};
use crate::utils::text::clean;

pub const AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download cancelled")]
    Cancelled,

    #[error("failed to launch downloader: {0}")]
    Spawn(#[source] io::Error),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What to do after one chunk of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkStep {
    Continue(f64),
    Abort,
}

/// Progress checkpoint a transfer reports to after every chunk.
pub struct ProgressGate<'a> {
    track: &'a TrackHandle,
    cancel: &'a CancellationToken,
}

impl<'a> ProgressGate<'a> {
    pub fn new(track: &'a TrackHandle, cancel: &'a CancellationToken) -> Self {
        Self { track, cancel }
    }

    /// Records `percent` on the track, or tells the transfer to abort once
    /// the run has been asked to stop.
    pub fn step(&self, percent: f64) -> ChunkStep {
        if self.cancel.is_cancelled() {
            return ChunkStep::Abort;
        }
        self.track.set_progress(percent);
        ChunkStep::Continue(percent)
    }
}

/// Where one transfer writes.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub download_root: PathBuf,
    /// Output path relative to the root, without extension.
    pub output_stem: PathBuf,
    /// Scratch space for intermediate artifacts; deleted after the transfer.
    pub scratch_dir: PathBuf,
}

/// Downloads, transcodes and tags one item.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(
        &self,
        link: &MediaRef,
        request: &TransferRequest,
        gate: &ProgressGate<'_>,
    ) -> Result<(), FetchError>;
}

#[derive(Debug)]
pub enum FetchOutcome {
    Completed,
    AlreadyExists,
    Failed(FetchError),
}

/// Cleaned folder name. Dot-only names would leave the download root, so they map to the root itself.
fn folder_component(folder: &str) -> String {
    let folder = clean(folder);
    if folder.chars().all(|c| c == '.') {
        String::new()
    } else {
        folder
    }
}

/// `{folder}/{title} - {artist}` with every component cleaned for the file system.
pub fn output_stem(track: &TrackDescriptor) -> PathBuf {
    let file_name = format!("{} - {}", clean(&track.title), clean(&track.artist));
    Path::new(&folder_component(&track.folder)).join(file_name)
}

pub struct Fetcher {
    transfer: Arc<dyn Transfer>,
    download_root: PathBuf,
    settings: watch::Receiver<RuntimeSettings>,
}

impl Fetcher {
    pub fn new(
        transfer: Arc<dyn Transfer>,
        download_root: PathBuf,
        settings: watch::Receiver<RuntimeSettings>,
    ) -> Self {
        Self {
            transfer,
            download_root,
            settings,
        }
    }

    pub fn output_path(&self, track: &TrackDescriptor) -> PathBuf {
        let stem = output_stem(track);
        let mut file_name = stem.file_name().unwrap_or_default().to_os_string();
        file_name.push(".");
        file_name.push(AUDIO_EXTENSION);
        self.download_root.join(stem.with_file_name(file_name))
    }

    /// Fetches `link` into the track's output file and records the result on the track.
    ///
    /// Never fails: errors end up as [`TrackStatus::DownloadFailed`].
    pub async fn fetch(
        &self,
        track: &TrackHandle,
        link: &MediaRef,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let descriptor = track.descriptor();
        let target = self.output_path(&descriptor);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            warn!("File Already Exists: {}", descriptor);
            track.set_status(TrackStatus::FileAlreadyExists);
            return FetchOutcome::AlreadyExists;
        }

        match self.transfer_once(track, &descriptor, link, cancel).await {
            Ok(()) => {
                info!("Download complete: {} ({})", descriptor, link);
                track.set_status(TrackStatus::ProcessingComplete);
                self.cooldown(cancel).await;
                FetchOutcome::Completed
            }
            Err(err) => {
                error!("Error downloading song: {}. Error message: {}", link, err);
                track.set_status(TrackStatus::DownloadFailed);
                FetchOutcome::Failed(err)
            }
        }
    }

    async fn transfer_once(
        &self,
        track: &TrackHandle,
        descriptor: &TrackDescriptor,
        link: &MediaRef,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let stem = output_stem(descriptor);
        if let Some(parent) = stem.parent() {
            tokio::fs::create_dir_all(self.download_root.join(parent)).await?;
        }
        // removed on drop, whichever way the transfer ends
        let scratch = tempfile::Builder::new().prefix("spottube-").tempdir()?;
        let request = TransferRequest {
            download_root: self.download_root.clone(),
            output_stem: stem,
            scratch_dir: scratch.path().to_path_buf(),
        };

        track.set_progress(0.0);
        let gate = ProgressGate::new(track, cancel);
        self.transfer.transfer(link, &request, &gate).await
    }

    async fn cooldown(&self, cancel: &CancellationToken) {
        let seconds = self.settings.borrow().sleep_interval;
        if seconds == 0 {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => debug!("Cooldown interrupted by stop request"),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        }
    }
}
