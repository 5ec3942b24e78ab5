//! Bounded worker pool
//!
//! At most `bound` units run at once. Dispatching into a full pool waits for
//! any unit to finish and hands its signal back to the caller.

use super::CompletionSignal;
use crate::error::SyncError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

pub struct WorkerPool<T> {
    tasks: JoinSet<CompletionSignal<T>>,
    bound: usize,
    peak: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(bound: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            bound: bound.max(1),
            peak: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Highest number of units that ran at the same time
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Start `future` as soon as a slot is free.
    ///
    /// Returns the signals of units that finished while waiting for the slot.
    pub async fn dispatch<F>(
        &mut self,
        label: impl Into<String>,
        future: F,
    ) -> Vec<CompletionSignal<T>>
    where
        F: Future<Output = crate::error::Result<T>> + Send + 'static,
    {
        let mut finished = Vec::new();
        while self.tasks.len() >= self.bound {
            match self.tasks.join_next().await {
                Some(signal) => finished.push(Self::collect(signal)),
                None => break,
            }
        }

        let label = label.into();
        self.tasks.spawn(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Worker(format!("unit '{}' panicked", label))),
            };
            CompletionSignal { label, result }
        });
        self.peak = self.peak.max(self.tasks.len());
        finished
    }

    /// Wait for every unit still running
    pub async fn drain(&mut self) -> Vec<CompletionSignal<T>> {
        let mut finished = Vec::with_capacity(self.tasks.len());
        while let Some(signal) = self.tasks.join_next().await {
            finished.push(Self::collect(signal));
        }
        finished
    }

    fn collect(
        joined: std::result::Result<CompletionSignal<T>, tokio::task::JoinError>,
    ) -> CompletionSignal<T> {
        joined.unwrap_or_else(|e| CompletionSignal {
            label: "unknown".to_string(),
            result: Err(SyncError::Worker(format!("unit did not complete: {}", e))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_never_exceeds_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3);
        let mut signals = Vec::new();

        for i in 0..12 {
            let running = Arc::clone(&running);
            let observed = Arc::clone(&observed);
            signals.extend(
                pool.dispatch(format!("unit-{}", i), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
                .await,
            );
            assert!(pool.in_flight() <= 3);
        }
        signals.extend(pool.drain().await);

        assert_eq!(signals.len(), 12);
        assert!(signals.iter().all(|s| s.is_success()));
        assert!(observed.load(Ordering::SeqCst) <= 3);
        assert!(pool.peak() <= 3);
    }

    fn always() -> bool {
        true
    }

    #[tokio::test]
    async fn test_failures_and_panics_still_signal() {
        let mut pool: WorkerPool<()> = WorkerPool::new(1);
        let mut signals = pool
            .dispatch("fails", async { Err(SyncError::Network("reset".into())) })
            .await;
        signals.extend(
            pool.dispatch("panics", async {
                if always() {
                    panic!("boom");
                }
                Ok(())
            })
            .await,
        );
        signals.extend(pool.dispatch("ok", async { Ok(()) }).await);
        signals.extend(pool.drain().await);

        assert_eq!(signals.len(), 3);
        let panicked = signals.iter().find(|s| s.label == "panics").unwrap();
        assert!(matches!(panicked.result, Err(SyncError::Worker(_))));
        assert_eq!(signals.iter().filter(|s| s.is_success()).count(), 1);
    }
}
