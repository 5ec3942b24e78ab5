//! Sync orchestration: resolution, bounded fan-out and per-tag copying

pub mod collector;
pub mod driver;
pub mod pool;
pub mod resolver;
pub mod worker;

pub use driver::{SyncDriver, SyncOptions, SyncReport};
pub use pool::WorkerPool;
pub use worker::{SyncUnit, TagSyncWorker};

use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::image::ImageReference;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Retries after the first copy attempt
pub const MAX_COPY_RETRIES: u32 = 3;

/// Hard ceiling on concurrently running units
pub const WORKER_LIMIT: usize = 6;

/// Pool bound: `min(CPU count, 6)`
pub fn max_workers() -> usize {
    num_cpus::get().clamp(1, WORKER_LIMIT)
}

/// One source to sync from, with the images resolved for it
#[derive(Debug, Clone)]
pub struct RepoDescriptor {
    pub context: SystemContext,
    pub tagged_images: Vec<ImageReference>,
    /// Set for directory sources; destinations keep paths relative to it
    pub dir_base_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Destination directory already holds the source's layers
    Unchanged,
    ArchitectureMismatch { expected: String, found: String },
}

/// What a successful unit did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Copied,
    Skipped(SkipReason),
}

/// Result of one dispatched unit, delivered exactly once
#[derive(Debug)]
pub struct CompletionSignal<T> {
    pub label: String,
    pub result: Result<T>,
}

impl<T> CompletionSignal<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Shared deadline for a whole run
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn none() -> Self {
        Self { at: None }
    }

    /// Run `future`, failing with `Timeout` once the deadline passes
    pub async fn run<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.at {
            Some(at) => tokio::time::timeout_at(at, future)
                .await
                .map_err(|_| SyncError::Timeout(operation.to_string()))?,
            None => future.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_workers_bound() {
        let bound = max_workers();
        assert!(bound >= 1);
        assert!(bound <= WORKER_LIMIT);
        assert_eq!(bound, num_cpus::get().min(WORKER_LIMIT).max(1));
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let deadline = Deadline::after(Some(Duration::from_millis(10)));
        let result: Result<()> = deadline
            .run("inspect", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(SyncError::Timeout(op)) if op == "inspect"));
    }

    #[tokio::test]
    async fn test_no_deadline_passes_through() {
        let value = Deadline::none().run("list", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
