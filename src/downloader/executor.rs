use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{AcquireError, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::downloader::fetcher::{FetchError, FetchOutcome, Fetcher};
use crate::resolver::Resolver;
use crate::track::{RunStatus, Track, TrackDescriptor, TrackHandle, TrackStatus};
use crate::utils::limited_spawner::LimitedSpawner;
use crate::utils::multierr::MultiError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a dispatch loop is still active")]
    Busy,

    #[error("worker pool unavailable: {0}")]
    Pool(#[from] AcquireError),

    #[error("worker tasks died: {0}")]
    Tasks(MultiError<JoinError>),
}

/// Point-in-time copy of the engine's state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tracks: Vec<Track>,
    pub status: RunStatus,
    /// Tracks processed so far in the current run.
    pub cursor: usize,
}

impl Snapshot {
    pub fn percent_completion(&self) -> f64 {
        if self.tracks.is_empty() {
            0.0
        } else {
            100.0 * self.cursor as f64 / self.tracks.len() as f64
        }
    }
}

struct Queue {
    tracks: Vec<TrackHandle>,
    cancel: CancellationToken,
    running: bool,
    // `start` arrived while a stop was unwinding
    resume: bool,
    // tracks queued before a `clear` that the active run still has to drop
    cleared: Option<usize>,
}

struct Shared {
    queue: Mutex<Queue>,
    cursor: AtomicUsize,
    // only written while `queue` is locked
    status: watch::Sender<RunStatus>,
    resolver: Resolver,
    fetcher: Fetcher,
    thread_limit: usize,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the track list and runs it through a bounded pool of workers.
#[derive(Clone)]
pub struct QueueEngine {
    shared: Arc<Shared>,
}

impl QueueEngine {
    pub fn new(resolver: Resolver, fetcher: Fetcher, thread_limit: usize) -> Self {
        let (status, _) = watch::channel(RunStatus::Unknown);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    tracks: Vec::new(),
                    cancel: CancellationToken::new(),
                    running: false,
                    resume: false,
                    cleared: None,
                }),
                cursor: AtomicUsize::new(0),
                status,
                resolver,
                fetcher,
                thread_limit: thread_limit.max(1),
            }),
        }
    }

    /// Appends tracks to the tail. A running pass picks them up without a new `start`.
    pub fn enqueue(&self, tracks: impl IntoIterator<Item = TrackDescriptor>) -> usize {
        let mut queue = self.shared.lock_queue();
        queue.tracks.extend(tracks.into_iter().map(TrackHandle::new));
        queue.tracks.len()
    }

    /// Swaps in a fresh list; only allowed between runs.
    pub fn replace(&self, tracks: impl IntoIterator<Item = TrackDescriptor>) -> Result<(), EngineError> {
        let mut queue = self.shared.lock_queue();
        if queue.running {
            return Err(EngineError::Busy);
        }
        queue.tracks = tracks.into_iter().map(TrackHandle::new).collect();
        self.shared.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Begins a run over the current list. Returns `false` when one is already going.
    ///
    /// While a stop is still unwinding, the active run is told to carry on
    /// with the list instead of ending as `Stopped`.
    pub fn start(&self) -> bool {
        let mut queue = self.shared.lock_queue();
        if queue.running {
            if !queue.cancel.is_cancelled() || queue.resume {
                return false;
            }
            info!("Start requested while stopping, resuming the run");
            queue.resume = true;
            return true;
        }
        if queue.cancel.is_cancelled() {
            queue.cancel = CancellationToken::new();
        }
        self.shared.cursor.store(0, Ordering::SeqCst);
        queue.running = true;
        self.shared.status.send_replace(RunStatus::Running);
        drop(queue);

        tokio::spawn(self.clone().dispatch());
        true
    }

    /// Signals cancellation and returns immediately; workers notice at their next checkpoint.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.shared.lock_queue().cancel.cancel();
    }

    /// Cancels the run and wipes the list. The wipe is left to the stopping
    /// run when a dispatch loop is still active; returns whether it happened now.
    pub fn clear(&self) -> bool {
        let mut queue = self.shared.lock_queue();
        queue.cancel.cancel();
        if queue.running {
            queue.resume = false;
            queue.cleared = Some(queue.tracks.len());
            return false;
        }
        queue.tracks.clear();
        self.shared.cursor.store(0, Ordering::SeqCst);
        true
    }

    pub fn remove(&self, position: usize) -> Option<Track> {
        let mut queue = self.shared.lock_queue();
        (position < queue.tracks.len()).then(|| queue.tracks.remove(position).snapshot())
    }

    /// Returns the engine to its initial state; refused while a run is active.
    pub fn reset(&self) -> Result<(), EngineError> {
        let mut queue = self.shared.lock_queue();
        if queue.running {
            return Err(EngineError::Busy);
        }
        queue.cancel = CancellationToken::new();
        queue.resume = false;
        queue.cleared = None;
        self.shared.cursor.store(0, Ordering::SeqCst);
        self.shared.status.send_replace(RunStatus::Unknown);
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.shared.status.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        let queue = self.shared.lock_queue();
        let tracks: Vec<Track> = queue.tracks.iter().map(TrackHandle::snapshot).collect();
        Snapshot {
            cursor: self.shared.cursor.load(Ordering::SeqCst).min(tracks.len()),
            status: *self.shared.status.borrow(),
            tracks,
        }
    }

    async fn dispatch(self) {
        let result = loop {
            let result = self.dispatch_loop().await;

            let mut queue = self.shared.lock_queue();
            if result.is_ok() && queue.cancel.is_cancelled() && queue.resume {
                queue.resume = false;
                queue.cancel = CancellationToken::new();
                if let Some(cleared) = queue.cleared.take() {
                    let cleared = cleared.min(queue.tracks.len());
                    queue.tracks.drain(..cleared);
                    self.shared.cursor.store(0, Ordering::SeqCst);
                }
                info!("Resuming with {} queued track(s)", queue.tracks.len());
                continue;
            }
            break result;
        };

        let mut queue = self.shared.lock_queue();
        queue.running = false;
        queue.resume = false;
        queue.cleared = None;
        let status = match result {
            Err(err) => {
                error!("Error in dispatch loop: {}", err);
                RunStatus::Error
            }
            Ok(()) if queue.cancel.is_cancelled() => {
                queue.tracks.clear();
                warn!("Stopped");
                RunStatus::Stopped
            }
            Ok(()) => {
                info!("Finished");
                RunStatus::Complete
            }
        };
        self.shared.status.send_replace(status);
    }

    async fn dispatch_loop(&self) -> Result<(), EngineError> {
        let spawner = LimitedSpawner::new(self.shared.thread_limit);
        loop {
            let (batch, cancel) = {
                let queue = self.shared.lock_queue();
                let start = self.shared.cursor.load(Ordering::SeqCst);
                if queue.cancel.is_cancelled() || start >= queue.tracks.len() {
                    return Ok(());
                }
                (queue.tracks[start..].to_vec(), queue.cancel.clone())
            };

            let mut handles = Vec::with_capacity(batch.len());
            for track in batch {
                let task = process(Arc::clone(&self.shared), track, cancel.clone());
                match spawner.spawn(&cancel, task).await? {
                    Some(handle) => handles.push(handle),
                    None => break,
                }
            }

            let mut failures = MultiError::default();
            for handle in handles {
                if let Err(err) = handle.await {
                    failures.push(err);
                }
            }
            for err in failures.errors() {
                error!("Worker task died: {}", err);
            }
            failures.into_result().map_err(EngineError::Tasks)?;
        }
    }
}

/// Resolves and fetches one track. Whatever happens, the cursor advances by one.
async fn process(shared: Arc<Shared>, track: TrackHandle, cancel: CancellationToken) {
    let descriptor = track.descriptor();
    info!("Searching for Song: {}", descriptor);

    match shared.resolver.resolve(&descriptor).await {
        Ok(Some(resolution)) => {
            info!(
                "Link found for {}: {} ({:?})",
                descriptor, resolution.link, resolution.confidence
            );
            track.set_status(TrackStatus::LinkFound);
            let outcome = shared.fetcher.fetch(&track, &resolution.link, &cancel).await;
            if let FetchOutcome::Failed(FetchError::Cancelled) = outcome {
                debug!("Transfer of {} cancelled", descriptor);
            }
        }
        Ok(None) => {
            warn!("No Link Found for: {}", descriptor);
            track.set_status(TrackStatus::NoLinkFound);
        }
        Err(err) => {
            error!("Error searching for song: {}. Error message: {}", descriptor, err);
            track.set_status(TrackStatus::SearchFailed);
        }
    }

    debug!("{} finished as {}", descriptor, track.status());
    shared.cursor.fetch_add(1, Ordering::SeqCst);
}
