use std::future::Future;
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns tasks while holding at most `max_concurrent` of them in flight.
pub struct LimitedSpawner {
    semaphore: Arc<Semaphore>,
}

impl LimitedSpawner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Waits for a free slot and spawns `f` on it.
    ///
    /// Returns `Ok(None)` without spawning when `cancel` fires first, so a
    /// stop request is honored even while the pool is saturated.
    pub async fn spawn<F>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<Option<JoinHandle<F::Output>>, AcquireError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            permit = semaphore.acquire_owned() => permit?,
        };
        Ok(Some(tokio::spawn(async move {
            let _permit = permit;
            f.await
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrent_limit() {
        let spawner = LimitedSpawner::new(2);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let handle = spawner
                .spawn(&cancel, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(40)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap()
                .unwrap();
            handles.push(handle);
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let spawner = LimitedSpawner::new(1);
        let cancel = CancellationToken::new();

        let busy = spawner
            .spawn(&cancel, sleep(Duration::from_millis(200)))
            .await
            .unwrap()
            .unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let second = spawner.spawn(&cancel, async { 7 }).await.unwrap();
        assert!(second.is_none());
        busy.await.unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_spawns_nothing() {
        let spawner = LimitedSpawner::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let handle = spawner.spawn(&cancel, async { 1 }).await.unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let spawner = LimitedSpawner::new(1);
        let cancel = CancellationToken::new();

        let failing = spawner
            .spawn(&cancel, async { panic!("boom") })
            .await
            .unwrap()
            .unwrap();
        assert!(failing.await.is_err());

        let next = spawner.spawn(&cancel, async { 42 }).await.unwrap().unwrap();
        assert_eq!(next.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_single_slot_runs_in_order() {
        let spawner = LimitedSpawner::new(1);
        let cancel = CancellationToken::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            handles.push(
                spawner
                    .spawn(&cancel, async move {
                        order.lock().unwrap().push(i);
                        sleep(Duration::from_millis(10)).await;
                    })
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
