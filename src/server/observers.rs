use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::downloader::QueueEngine;
use crate::monitor::{ProgressMonitor, ProgressReport};

const BUFFER: usize = 16;

#[derive(Default)]
struct HubState {
    observers: usize,
    monitor: Option<ProgressMonitor>,
}

/// Shares one progress monitor between all connected observers.
pub struct ObserverHub {
    engine: QueueEngine,
    reports: broadcast::Sender<Arc<ProgressReport>>,
    interval: Duration,
    state: Mutex<HubState>,
}

impl ObserverHub {
    pub fn new(engine: QueueEngine, interval: Duration) -> Arc<Self> {
        let (reports, _) = broadcast::channel(BUFFER);
        Arc::new(Self {
            engine,
            reports,
            interval,
            state: Mutex::new(HubState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an observer, starting the monitor if it is the first one.
    pub fn attach(self: &Arc<Self>) -> Observer {
        let mut state = self.lock();
        let reports = self.reports.subscribe();
        state.observers += 1;
        if state.monitor.is_none() {
            info!("First observer connected, starting progress monitor");
            state.monitor = Some(ProgressMonitor::start(
                self.engine.clone(),
                Arc::new(self.reports.clone()),
                self.interval,
            ));
        }
        Observer {
            hub: Arc::clone(self),
            reports,
        }
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.observers = state.observers.saturating_sub(1);
        if state.observers == 0 {
            if let Some(monitor) = state.monitor.take() {
                info!("Last observer gone, stopping progress monitor");
                monitor.stop();
            }
        }
    }

    pub fn observers(&self) -> usize {
        self.lock().observers
    }

    pub fn monitoring(&self) -> bool {
        self.lock().monitor.is_some()
    }
}

/// A connected observer. Dropping it detaches from the hub.
pub struct Observer {
    hub: Arc<ObserverHub>,
    reports: broadcast::Receiver<Arc<ProgressReport>>,
}

impl Observer {
    pub async fn recv(&mut self) -> Result<Arc<ProgressReport>, broadcast::error::RecvError> {
        self.reports.recv().await
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.hub.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::executor::tests::{slow_transfer, test_engine};
    use crate::resolver::tests::FakeSearch;
    use crate::track::RunStatus;

    #[tokio::test]
    async fn test_monitor_follows_observer_count() {
        let root = tempfile::tempdir().unwrap();
        let engine = test_engine(FakeSearch::default(), slow_transfer(1), 1, &root);
        let hub = ObserverHub::new(engine, Duration::from_millis(5));
        assert!(!hub.monitoring());

        let mut first = hub.attach();
        let second = hub.attach();
        assert_eq!(hub.observers(), 2);
        assert!(hub.monitoring());
        assert_eq!(first.recv().await.unwrap().status, RunStatus::Unknown);

        drop(second);
        assert!(hub.monitoring());
        drop(first);
        assert_eq!(hub.observers(), 0);
        assert!(!hub.monitoring());

        let _third = hub.attach();
        assert!(hub.monitoring());
    }
}
