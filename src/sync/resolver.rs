//! Reference resolution: source locators to concrete tagged images

use super::{Deadline, RepoDescriptor};
use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::image::{DockerReference, ImageReference, Locator};
use crate::transport::ImageTransport;
use std::path::Path;
use std::sync::Arc;

/// Resolve a single-source SOURCE argument
pub async fn resolve_from_locator(
    transport: &dyn ImageTransport,
    locator: &Locator,
    ctx: &SystemContext,
    deadline: Deadline,
) -> Result<RepoDescriptor> {
    let descriptor = match locator {
        Locator::Docker { host, path } => {
            if path.is_empty() {
                return Err(SyncError::SourceParse(format!(
                    "no repository specified in '{}'",
                    locator
                )));
            }
            let reference = DockerReference::parse(&format!("{}/{}", host, path))
                .map_err(SyncError::SourceParse)?;
            RepoDescriptor {
                context: ctx.clone(),
                tagged_images: images_from_registry(transport, &reference, &[], ctx, deadline)
                    .await?,
                dir_base_path: None,
            }
        }
        Locator::Directory { path } => RepoDescriptor {
            context: ctx.clone(),
            tagged_images: images_from_directory(transport, path)?,
            dir_base_path: Some(path.clone()),
        },
    };

    if descriptor.tagged_images.is_empty() {
        return Err(SyncError::NoImagesFound(locator.to_string()));
    }
    Ok(descriptor)
}

/// Resolve one repository of a YAML registry entry
pub async fn resolve_repository(
    transport: Arc<dyn ImageTransport>,
    registry: String,
    repository: String,
    tags: Vec<String>,
    ctx: SystemContext,
    deadline: Deadline,
) -> Result<RepoDescriptor> {
    let name = format!("{}/{}", registry, repository);
    let reference = DockerReference::parse(&name).map_err(SyncError::SourceParse)?;
    let tagged_images =
        images_from_registry(transport.as_ref(), &reference, &tags, &ctx, deadline).await?;

    if tagged_images.is_empty() {
        return Err(SyncError::NoImagesFound(name));
    }
    Ok(RepoDescriptor {
        context: ctx,
        tagged_images,
        dir_base_path: None,
    })
}

/// Images of one registry repository.
///
/// A tagged reference resolves to itself. Otherwise `tags` are used when
/// given, or the full tag list is fetched. Tags that do not parse are
/// logged and skipped.
pub async fn images_from_registry(
    transport: &dyn ImageTransport,
    reference: &DockerReference,
    tags: &[String],
    ctx: &SystemContext,
    deadline: Deadline,
) -> Result<Vec<ImageReference>> {
    if reference.tag().is_some() {
        return Ok(vec![ImageReference::Docker(reference.clone())]);
    }

    let tags = if tags.is_empty() {
        let operation = format!("tag listing for {}", reference);
        deadline
            .run(&operation, transport.list_tags(reference, ctx))
            .await?
    } else {
        tags.to_vec()
    };

    let mut images = Vec::with_capacity(tags.len());
    for tag in tags {
        match reference.with_tag(&tag) {
            Ok(tagged) => images.push(ImageReference::Docker(tagged)),
            Err(reason) => {
                let err = SyncError::TagParse { tag, reason };
                tracing::warn!(repo = %reference, error = %err, "Skipping tag");
            }
        }
    }
    Ok(images)
}

pub fn images_from_directory(
    transport: &dyn ImageTransport,
    base: &Path,
) -> Result<Vec<ImageReference>> {
    let images = transport.list_directory_images(base)?;
    tracing::debug!(path = %base.display(), count = images.len(), "Found directory images");
    Ok(images.into_iter().map(ImageReference::Directory).collect())
}
