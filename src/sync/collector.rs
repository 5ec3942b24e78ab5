//! Multi-registry collection for `--source-yaml`

use super::pool::WorkerPool;
use super::resolver::resolve_repository;
use super::{CompletionSignal, Deadline, RepoDescriptor};
use crate::config::{SourceConfig, SystemContext};
use crate::transport::ImageTransport;
use std::sync::Arc;

/// Resolve every configured repository into descriptors.
///
/// Registries are processed one after another; repositories of a registry
/// are resolved concurrently, at most `workers` at a time. Failed or empty
/// repositories are logged and left out.
pub async fn collect_all(
    transport: Arc<dyn ImageTransport>,
    config: &SourceConfig,
    base_ctx: &SystemContext,
    workers: usize,
    deadline: Deadline,
) -> Vec<RepoDescriptor> {
    let mut descriptors = Vec::new();

    for (registry, source) in &config.registries {
        if source.is_empty() {
            tracing::warn!(registry = %registry, "No images specified for registry");
            continue;
        }

        let ctx = base_ctx.with_registry_overrides(source);
        let mut pool: WorkerPool<RepoDescriptor> = WorkerPool::new(workers);
        let mut signals = Vec::new();

        for (repository, tags) in source.repositories() {
            tracing::debug!(registry = %registry, repo = repository, "Processing repo");
            let unit = resolve_repository(
                Arc::clone(&transport),
                registry.clone(),
                repository.to_string(),
                tags.to_vec(),
                ctx.clone(),
                deadline,
            );
            signals.extend(
                pool.dispatch(format!("{}/{}", registry, repository), unit)
                    .await,
            );
        }
        signals.extend(pool.drain().await);

        descriptors.extend(accept(registry, signals));
    }

    descriptors
}

fn accept(
    registry: &str,
    signals: Vec<CompletionSignal<RepoDescriptor>>,
) -> impl Iterator<Item = RepoDescriptor> + '_ {
    signals.into_iter().filter_map(move |signal| match signal.result {
        Ok(descriptor) => Some(descriptor),
        Err(e) if e.is_not_found() => {
            tracing::warn!(
                registry,
                repo = %signal.label,
                error = %e,
                "Repository not found, skipping"
            );
            None
        }
        Err(e) => {
            tracing::error!(
                registry,
                repo = %signal.label,
                error = %e,
                "Error processing repo, skipping"
            );
            None
        }
    })
}
