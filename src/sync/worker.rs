//! Per-tag sync: destination, skip decision, architecture filter, copy, retry

use super::{Deadline, SkipReason, SyncOutcome, MAX_COPY_RETRIES};
use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::image::manifest::layers_unchanged;
use crate::image::{build_destination, ImageInspectInfo, ImageReference, Locator};
use crate::transport::{CopyOptions, ImageTransport, PolicyContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One source image to bring to the destination
#[derive(Debug, Clone)]
pub struct SyncUnit {
    /// Position of the image within its repository, starting at 0
    pub counter: usize,
    pub total: usize,
    pub source: ImageReference,
    pub destination: Arc<Locator>,
    pub dir_base_path: Option<PathBuf>,
    pub source_ctx: SystemContext,
    pub options: Arc<CopyOptions>,
}

impl SyncUnit {
    pub fn label(&self) -> String {
        self.source.to_string()
    }
}

enum AttemptError {
    /// Not worth retrying
    Fatal(SyncError),
    Copy(SyncError),
}

#[derive(Clone)]
pub struct TagSyncWorker {
    transport: Arc<dyn ImageTransport>,
    policy: Arc<PolicyContext>,
    override_arch: Option<String>,
    deadline: Deadline,
    max_retries: u32,
    retry_delay: Duration,
}

impl TagSyncWorker {
    pub fn new(
        transport: Arc<dyn ImageTransport>,
        policy: Arc<PolicyContext>,
        override_arch: Option<String>,
        deadline: Deadline,
    ) -> Self {
        Self {
            transport,
            policy,
            override_arch: override_arch.filter(|a| !a.is_empty()),
            deadline,
            max_retries: MAX_COPY_RETRIES,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Base delay between attempts; attempt `n` waits `n` times this long
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sync one image, retrying the whole procedure when the copy fails
    pub async fn sync_one(&self, unit: SyncUnit) -> Result<SyncOutcome> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(&unit).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Copy(e)) => e,
            };

            tracing::error!(
                image = %unit.source,
                attempt,
                transient = error.is_transient(),
                error = %error,
                "Error copying tag"
            );

            let exhausted = attempt > self.max_retries;
            if exhausted || error.is_timeout() {
                return Err(SyncError::Copy {
                    image: unit.source.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.retry_delay * attempt;
            if !delay.is_zero() {
                let waited = self
                    .deadline
                    .run("retry backoff", async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await;
                if let Err(timeout) = waited {
                    return Err(SyncError::Copy {
                        image: unit.source.to_string(),
                        attempts: attempt,
                        source: Box::new(timeout),
                    });
                }
            }
        }
    }

    async fn attempt(&self, unit: &SyncUnit) -> std::result::Result<SyncOutcome, AttemptError> {
        let destination = build_destination(
            &unit.source,
            &unit.destination,
            unit.dir_base_path.as_deref(),
        )
        .map_err(AttemptError::Fatal)?;

        let operation = format!("inspect {}", unit.source);
        let info = self
            .deadline
            .run(&operation, self.transport.inspect(&unit.source, &unit.source_ctx))
            .await
            .map_err(|e| {
                AttemptError::Fatal(SyncError::Inspect {
                    image: unit.source.to_string(),
                    source: Box::new(e),
                })
            })?;

        if self.destination_unchanged(&info, &destination).await {
            tracing::info!(image = %unit.source, to = %destination, "Skipping unchanged image");
            return Ok(SyncOutcome::Skipped(SkipReason::Unchanged));
        }

        if let Some(expected) = &self.override_arch {
            if !info.architecture.is_empty() && &info.architecture != expected {
                tracing::info!(
                    image = %unit.source,
                    architecture = %info.architecture,
                    expected = %expected,
                    "Skipping image for another architecture"
                );
                return Ok(SyncOutcome::Skipped(SkipReason::ArchitectureMismatch {
                    expected: expected.clone(),
                    found: info.architecture,
                }));
            }
        }

        tracing::info!(
            from = %unit.source,
            to = %destination,
            "Copying image ref {}/{}",
            unit.counter + 1,
            unit.total
        );

        let options = CopyOptions {
            source_ctx: unit.source_ctx.clone(),
            ..CopyOptions::clone(&unit.options)
        };
        let operation = format!("copy {}", unit.source);
        self.deadline
            .run(
                &operation,
                self.transport
                    .copy(&unit.source, &destination, &self.policy, &options),
            )
            .await
            .map_err(AttemptError::Copy)?;

        Ok(SyncOutcome::Copied)
    }

    /// Skip decision for directory destinations that already hold a manifest
    async fn destination_unchanged(
        &self,
        info: &ImageInspectInfo,
        destination: &ImageReference,
    ) -> bool {
        if !destination.is_directory() || !self.transport.manifest_exists_at(destination).await {
            return false;
        }
        if info.layers.is_empty() {
            return true;
        }

        match self.transport.read_destination_manifest(destination).await {
            Ok(manifest) => layers_unchanged(&info.layers, &manifest),
            Err(e) => {
                tracing::warn!(
                    to = %destination,
                    error = %e,
                    "Unreadable destination manifest, copying again"
                );
                false
            }
        }
    }
}
