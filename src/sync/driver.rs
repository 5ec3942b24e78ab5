//! Sync driver: resolves sources and fans tag syncs out to the worker pool

use super::collector::collect_all;
use super::pool::WorkerPool;
use super::resolver::resolve_from_locator;
use super::worker::{SyncUnit, TagSyncWorker};
use super::{max_workers, CompletionSignal, Deadline, RepoDescriptor, SyncOutcome};
use crate::config::{SourceConfig, SystemContext};
use crate::error::{Result, SyncError};
use crate::image::Locator;
use crate::transport::{CopyOptions, ImageTransport, PolicyContext};
use std::sync::Arc;
use std::time::Duration;

/// Settings of one run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Treat SOURCE as a YAML source list
    pub source_yaml: bool,
    pub remove_signatures: bool,
    pub sign_by: Option<String>,
    pub source_ctx: SystemContext,
    pub destination_ctx: SystemContext,
    pub override_arch: Option<String>,
    pub timeout: Option<Duration>,
    /// Requested pool size, capped at [`max_workers`]
    pub workers: Option<usize>,
    pub retry_delay: Duration,
    pub report: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            source_yaml: false,
            remove_signatures: false,
            sign_by: None,
            source_ctx: SystemContext::default(),
            destination_ctx: SystemContext::default(),
            override_arch: None,
            timeout: None,
            workers: None,
            retry_delay: Duration::from_secs(1),
            report: false,
        }
    }
}

impl SyncOptions {
    pub fn worker_count(&self) -> usize {
        let bound = max_workers();
        self.workers.map_or(bound, |n| n.clamp(1, bound))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Units dispatched, whether copied, skipped or failed
    pub images: usize,
    pub sources: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub peak_in_flight: usize,
    /// `image: error` for every failed unit
    pub failures: Vec<String>,
}

impl SyncReport {
    fn record(&mut self, signals: Vec<CompletionSignal<SyncOutcome>>) {
        for signal in signals {
            match signal.result {
                Ok(SyncOutcome::Copied) => self.copied += 1,
                Ok(SyncOutcome::Skipped(_)) => self.skipped += 1,
                Err(e) => {
                    self.failed += 1;
                    self.failures.push(format!("{}: {}", signal.label, e));
                }
            }
        }
    }
}

pub struct SyncDriver {
    transport: Arc<dyn ImageTransport>,
    policy: Arc<PolicyContext>,
}

impl SyncDriver {
    pub fn new(transport: Arc<dyn ImageTransport>, policy: PolicyContext) -> Self {
        Self {
            transport,
            policy: Arc::new(policy),
        }
    }

    /// Sync `args[0]` (SOURCE) into `args[1]` (DESTINATION)
    pub async fn run(&self, args: &[String], options: &SyncOptions) -> Result<SyncReport> {
        let [source, destination] = args else {
            return Err(SyncError::Usage(
                "Exactly two arguments expected: SOURCE DESTINATION".to_string(),
            ));
        };

        if options.sign_by.is_some() && !self.transport.supports_signing() {
            return Err(SyncError::Unsupported(
                "--sign-by is not supported by this transport".to_string(),
            ));
        }

        let destination = Locator::parse(destination).map_err(SyncError::DestinationParse)?;
        let deadline = Deadline::after(options.timeout);
        let workers = options.worker_count();

        let descriptors = if options.source_yaml {
            let config = SourceConfig::from_file(source)?;
            collect_all(
                Arc::clone(&self.transport),
                &config,
                &options.source_ctx,
                workers,
                deadline,
            )
            .await
        } else {
            let source = Locator::parse(source).map_err(SyncError::SourceParse)?;
            if source.is_directory() && destination.is_directory() {
                return Err(SyncError::Unsupported(
                    "registry-sync from 'dir:' to 'dir:' not implemented, use something like rsync instead"
                        .to_string(),
                ));
            }
            vec![
                resolve_from_locator(
                    self.transport.as_ref(),
                    &source,
                    &options.source_ctx,
                    deadline,
                )
                .await?,
            ]
        };

        let worker = TagSyncWorker::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.policy),
            options.override_arch.clone(),
            deadline,
        )
        .with_retry_delay(options.retry_delay);
        let copy_options = Arc::new(CopyOptions {
            remove_signatures: options.remove_signatures,
            sign_by: options.sign_by.clone(),
            report: options.report,
            source_ctx: options.source_ctx.clone(),
            destination_ctx: options.destination_ctx.clone(),
        });
        let destination = Arc::new(destination);

        let mut report = SyncReport::default();
        for descriptor in descriptors {
            report.sources += 1;
            self.sync_repository(
                descriptor,
                &worker,
                &destination,
                &copy_options,
                workers,
                &mut report,
            )
            .await;
        }

        tracing::info!(
            "registry-synced {} images from {} sources",
            report.images,
            report.sources
        );
        Ok(report)
    }

    /// Dispatch every image of one descriptor and wait for all of them
    async fn sync_repository(
        &self,
        descriptor: RepoDescriptor,
        worker: &TagSyncWorker,
        destination: &Arc<Locator>,
        copy_options: &Arc<CopyOptions>,
        workers: usize,
        report: &mut SyncReport,
    ) {
        let RepoDescriptor {
            context,
            tagged_images,
            dir_base_path,
        } = descriptor;
        let total = tagged_images.len();
        let mut pool: WorkerPool<SyncOutcome> = WorkerPool::new(workers);

        for (counter, source) in tagged_images.into_iter().enumerate() {
            let unit = SyncUnit {
                counter,
                total,
                source,
                destination: Arc::clone(destination),
                dir_base_path: dir_base_path.clone(),
                source_ctx: context.clone(),
                options: Arc::clone(copy_options),
            };
            let worker = worker.clone();
            let finished = pool
                .dispatch(unit.label(), async move { worker.sync_one(unit).await })
                .await;
            report.images += 1;
            report.record(finished);
        }

        let finished = pool.drain().await;
        report.record(finished);
        report.peak_in_flight = report.peak_in_flight.max(pool.peak());
    }
}
