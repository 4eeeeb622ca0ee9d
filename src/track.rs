use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A song as handed over by the catalog extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackDescriptor {
    pub artist: String,
    pub title: String,
    /// Destination sub-path below the download root.
    #[serde(default)]
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

impl TrackDescriptor {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            folder: folder.into(),
            release_date: None,
        }
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artist)
    }
}

/// Per-track state. The serialized literals are read by observers and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    #[serde(rename = "Queued")]
    Queued,
    #[serde(rename = "Link Found")]
    LinkFound,
    #[serde(rename = "Running")]
    Running,
    #[serde(rename = "Processing Complete")]
    ProcessingComplete,
    #[serde(rename = "File Already Exists")]
    FileAlreadyExists,
    #[serde(rename = "No Link Found")]
    NoLinkFound,
    #[serde(rename = "Search Failed")]
    SearchFailed,
    #[serde(rename = "Download Failed")]
    DownloadFailed,
}

impl TrackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackStatus::Queued => "Queued",
            TrackStatus::LinkFound => "Link Found",
            TrackStatus::Running => "Running",
            TrackStatus::ProcessingComplete => "Processing Complete",
            TrackStatus::FileAlreadyExists => "File Already Exists",
            TrackStatus::NoLinkFound => "No Link Found",
            TrackStatus::SearchFailed => "Search Failed",
            TrackStatus::DownloadFailed => "Download Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            TrackStatus::Queued | TrackStatus::LinkFound | TrackStatus::Running
        )
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Unknown,
    Running,
    Complete,
    Stopped,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Unknown => "Unknown",
            RunStatus::Running => "Running",
            RunStatus::Complete => "Complete",
            RunStatus::Stopped => "Stopped",
            RunStatus::Error => "Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Complete | RunStatus::Stopped | RunStatus::Error
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    #[serde(flatten)]
    pub descriptor: TrackDescriptor,
    #[serde(rename = "Status")]
    pub status: TrackStatus,
    #[serde(rename = "Percent")]
    pub percent_downloaded: f64,
}

impl Track {
    pub fn new(descriptor: TrackDescriptor) -> Self {
        Self {
            descriptor,
            status: TrackStatus::Queued,
            percent_downloaded: 0.0,
        }
    }
}

/// Exclusive handle a worker holds on the one track it is processing.
///
/// The engine keeps a clone in its list so snapshots can read the live
/// status, but only the owning task ever writes through it.
#[derive(Debug, Clone)]
pub struct TrackHandle(Arc<Mutex<Track>>);

impl TrackHandle {
    pub fn new(descriptor: TrackDescriptor) -> Self {
        Self(Arc::new(Mutex::new(Track::new(descriptor))))
    }

    fn lock(&self) -> MutexGuard<'_, Track> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor(&self) -> TrackDescriptor {
        self.lock().descriptor.clone()
    }

    pub fn status(&self) -> TrackStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: TrackStatus) {
        let mut track = self.lock();
        track.status = status;
        if status == TrackStatus::ProcessingComplete {
            track.percent_downloaded = 100.0;
        }
    }

    /// Marks the track as transferring at `percent`.
    pub fn set_progress(&self, percent: f64) {
        let mut track = self.lock();
        track.status = TrackStatus::Running;
        track.percent_downloaded = percent.clamp(0.0, 100.0);
    }

    pub fn snapshot(&self) -> Track {
        self.lock().clone()
    }
}
