//! Image transport provider
//!
//! The sync engine only talks to [`ImageTransport`]. [`DefaultTransport`]
//! implements it for `docker://` registries and `dir:` directories.

pub mod directory;
pub mod policy;

pub use policy::PolicyContext;

use crate::config::SystemContext;
use crate::error::{Result, SyncError};
use crate::image::manifest::{is_index, ImageConfig, ManifestIndex};
use crate::image::{
    DigestUtils, DockerReference, ImageInspectInfo, ImageReference, ManifestSummary, Platform,
};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Blobs transferred at once for a single image
const BLOB_CONCURRENCY: usize = 3;

/// Options shared by every copy of a run
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub remove_signatures: bool,
    pub sign_by: Option<String>,
    /// Log each blob transfer at info level instead of debug
    pub report: bool,
    pub source_ctx: SystemContext,
    pub destination_ctx: SystemContext,
}

#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Every tag of a registry repository
    async fn list_tags(
        &self,
        repository: &DockerReference,
        ctx: &SystemContext,
    ) -> Result<Vec<String>>;

    /// Every image directory under `base`
    fn list_directory_images(&self, base: &Path) -> Result<Vec<PathBuf>> {
        directory::list_images(base)
    }

    async fn inspect(
        &self,
        image: &ImageReference,
        ctx: &SystemContext,
    ) -> Result<ImageInspectInfo>;

    /// Whether a directory destination already holds a manifest
    async fn manifest_exists_at(&self, image: &ImageReference) -> bool {
        image.as_directory().is_some_and(directory::has_manifest)
    }

    async fn read_destination_manifest(&self, image: &ImageReference) -> Result<ManifestSummary> {
        match image.as_directory() {
            Some(dir) => directory::read_manifest(dir).await,
            None => Err(SyncError::Unsupported(format!(
                "reading the destination manifest of {} is not supported",
                image
            ))),
        }
    }

    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        policy: &PolicyContext,
        options: &CopyOptions,
    ) -> Result<()>;

    fn supports_signing(&self) -> bool {
        false
    }
}

enum BlobSource {
    Registry {
        client: Arc<RegistryClient>,
        repository: String,
    },
    Directory(PathBuf),
}

impl BlobSource {
    /// Fetch a blob and check it against its digest
    async fn fetch(&self, digest: &str) -> Result<Vec<u8>> {
        let data = match self {
            BlobSource::Registry { client, repository } => {
                client.get_blob(repository, digest).await?
            }
            BlobSource::Directory(dir) => directory::read_blob(dir, digest).await?,
        };
        DigestUtils::verify(digest, &data)?;
        Ok(data)
    }
}

/// A single-platform image opened for reading
struct SourceImage {
    manifest_bytes: Vec<u8>,
    manifest: ManifestSummary,
    media_type: String,
    blobs: BlobSource,
}

/// Registry and directory transport with a per-context client cache
pub struct DefaultTransport {
    platform: Platform,
    clients: Mutex<HashMap<(String, SystemContext), Arc<RegistryClient>>>,
}

impl DefaultTransport {
    /// `platform` selects the entry of multi-platform manifest lists
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, host: &str, ctx: &SystemContext) -> Result<Arc<RegistryClient>> {
        let mut clients = self.clients.lock().await;
        let key = (host.to_string(), ctx.clone());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = Arc::new(RegistryClient::connect(host, ctx).await?);
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn open_source(
        &self,
        image: &ImageReference,
        ctx: &SystemContext,
    ) -> Result<SourceImage> {
        match image {
            ImageReference::Docker(reference) => {
                let client = self.client(reference.api_host(), ctx).await?;
                let repository = reference.repository().to_string();
                let (mut body, mut media_type) = client
                    .get_manifest(&repository, reference.tag_or_latest())
                    .await?;

                if is_index(&media_type, &body) {
                    let index: ManifestIndex = serde_json::from_slice(&body)?;
                    let entry = index.select(&self.platform).ok_or_else(|| {
                        SyncError::NotFound(format!(
                            "no image for {}/{} in manifest list of {}",
                            self.platform.os, self.platform.architecture, reference
                        ))
                    })?;
                    tracing::debug!(
                        image = %reference,
                        digest = %entry.digest,
                        "Resolved manifest list entry"
                    );

                    let (child, child_type) =
                        client.get_manifest(&repository, &entry.digest).await?;
                    DigestUtils::verify(&entry.digest, &child)?;
                    body = child;
                    media_type = if child_type.is_empty() {
                        entry.media_type.clone()
                    } else {
                        child_type
                    };
                }

                let manifest = parse_manifest(&body, image)?;
                if media_type.is_empty() {
                    media_type = manifest.content_type().to_string();
                }
                Ok(SourceImage {
                    manifest_bytes: body,
                    manifest,
                    media_type,
                    blobs: BlobSource::Registry { client, repository },
                })
            }
            ImageReference::Directory(dir) => {
                let body = directory::read_manifest_bytes(dir).await.map_err(|e| match e {
                    SyncError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                        SyncError::NotFound(format!("no manifest in {}", dir.display()))
                    }
                    other => other,
                })?;
                let manifest = parse_manifest(&body, image)?;
                Ok(SourceImage {
                    media_type: manifest.content_type().to_string(),
                    manifest_bytes: body,
                    manifest,
                    blobs: BlobSource::Directory(dir.clone()),
                })
            }
        }
    }

    async fn copy_to_directory(
        &self,
        source: &SourceImage,
        dir: &Path,
        report: bool,
    ) -> Result<()> {
        let writer = directory::DirectoryWriter::create(dir).await?;
        for blob in source.manifest.blobs() {
            log_blob(report, &blob.digest, blob.size);
            let data = source.blobs.fetch(&blob.digest).await?;
            writer.put_blob(&blob.digest, &data).await?;
        }
        writer.put_manifest(&source.manifest_bytes).await?;
        writer.commit().await
    }

    async fn copy_to_registry(
        &self,
        source: &SourceImage,
        destination: &DockerReference,
        ctx: &SystemContext,
        report: bool,
    ) -> Result<()> {
        let client = self.client(destination.api_host(), ctx).await?;
        let repository = destination.repository();
        let semaphore = Arc::new(Semaphore::new(BLOB_CONCURRENCY));

        let transfers = source.manifest.blobs().into_iter().map(|blob| {
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&client);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| {
                        SyncError::Worker(format!("Failed to acquire transfer permit: {}", e))
                    })?;

                if client.blob_exists(repository, &blob.digest).await? {
                    tracing::debug!(digest = %blob.digest, "Blob already present, skipping upload");
                    return Ok::<_, SyncError>(());
                }
                log_blob(report, &blob.digest, blob.size);
                let data = source.blobs.fetch(&blob.digest).await?;
                client.upload_blob(repository, &blob.digest, data).await
            }
        });
        try_join_all(transfers).await?;

        client
            .put_manifest(
                repository,
                destination.tag_or_latest(),
                &source.media_type,
                &source.manifest_bytes,
            )
            .await
    }
}

fn parse_manifest(body: &[u8], image: &ImageReference) -> Result<ManifestSummary> {
    let manifest = ManifestSummary::from_slice(body)?;
    if manifest.schema_version == 1 {
        return Err(SyncError::Unsupported(format!(
            "schema 1 manifest of {} is not supported",
            image
        )));
    }
    Ok(manifest)
}

fn log_blob(report: bool, digest: &str, size: u64) {
    if report {
        tracing::info!(digest, size, "Copying blob");
    } else {
        tracing::debug!(digest, size, "Copying blob");
    }
}

#[async_trait]
impl ImageTransport for DefaultTransport {
    async fn list_tags(
        &self,
        repository: &DockerReference,
        ctx: &SystemContext,
    ) -> Result<Vec<String>> {
        let client = self.client(repository.api_host(), ctx).await?;
        client.list_tags(repository.repository()).await
    }

    async fn inspect(
        &self,
        image: &ImageReference,
        ctx: &SystemContext,
    ) -> Result<ImageInspectInfo> {
        let source = self.open_source(image, ctx).await?;
        let config = if source.manifest.config.digest.is_empty() {
            ImageConfig::default()
        } else {
            let blob = source.blobs.fetch(&source.manifest.config.digest).await?;
            serde_json::from_slice(&blob)?
        };

        Ok(ImageInspectInfo {
            architecture: config.architecture,
            os: config.os,
            layers: source.manifest.layer_digests(),
            digest: Some(DigestUtils::compute_docker_digest(&source.manifest_bytes)),
        })
    }

    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        policy: &PolicyContext,
        options: &CopyOptions,
    ) -> Result<()> {
        policy.check(source)?;
        if options.sign_by.is_some() {
            return Err(SyncError::Unsupported(
                "signing is not supported by the built-in transport".to_string(),
            ));
        }
        if options.remove_signatures {
            tracing::debug!(image = %source, "Signatures are never copied, nothing to remove");
        }

        let image = self.open_source(source, &options.source_ctx).await?;
        match destination {
            ImageReference::Directory(dir) => {
                if source.is_directory() {
                    return Err(SyncError::Unsupported(
                        "copying from 'dir:' to 'dir:' is not supported".to_string(),
                    ));
                }
                self.copy_to_directory(&image, dir, options.report).await
            }
            ImageReference::Docker(reference) => {
                self.copy_to_registry(&image, reference, &options.destination_ctx, options.report)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::manifest::DOCKER_MANIFEST_V2;

    const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux"}"#;

    async fn source_dir(root: &Path) -> PathBuf {
        let dir = root.join("source/app:v1");
        let config_digest = DigestUtils::compute_docker_digest(CONFIG);
        let layer = b"layer-data".to_vec();
        let layer_digest = DigestUtils::compute_docker_digest(&layer);
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "size": CONFIG.len(), "digest": config_digest},
            "layers": [{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": layer.len(), "digest": layer_digest}]
        });
        let writer = directory::DirectoryWriter::create(&dir).await.unwrap();
        writer.put_blob(&config_digest, CONFIG).await.unwrap();
        writer.put_blob(&layer_digest, &layer).await.unwrap();
        writer
            .put_manifest(&serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();
        writer.commit().await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_inspect_directory_image() {
        let temp = tempfile::tempdir().unwrap();
        let dir = source_dir(temp.path()).await;
        let transport = DefaultTransport::new(Platform::new("amd64", "linux"));

        let info = transport
            .inspect(&ImageReference::Directory(dir), &SystemContext::default())
            .await
            .unwrap();
        assert_eq!(info.architecture, "amd64");
        assert_eq!(info.layers.len(), 1);
    }

    #[tokio::test]
    async fn test_destination_manifest_helpers() {
        let temp = tempfile::tempdir().unwrap();
        let dir = source_dir(temp.path()).await;
        let transport = DefaultTransport::new(Platform::new("amd64", "linux"));
        let image = ImageReference::Directory(dir);

        assert!(transport.manifest_exists_at(&image).await);
        let manifest = transport.read_destination_manifest(&image).await.unwrap();
        assert_eq!(manifest.layers.len(), 1);

        let missing = ImageReference::Directory(temp.path().join("missing"));
        assert!(!transport.manifest_exists_at(&missing).await);
    }

    #[tokio::test]
    async fn test_copy_checks_policy_and_signing_first() {
        let temp = tempfile::tempdir().unwrap();
        let dir = source_dir(temp.path()).await;
        let transport = DefaultTransport::new(Platform::new("amd64", "linux"));
        let source = ImageReference::Directory(dir);
        let destination =
            ImageReference::Docker(DockerReference::parse("localhost:5000/app:v1").unwrap());

        let reject = PolicyContext::from_json(r#"{"default":[{"type":"reject"}]}"#).unwrap();
        let err = transport
            .copy(&source, &destination, &reject, &CopyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Policy(_)));

        let options = CopyOptions {
            sign_by: Some("ABCDEF".to_string()),
            ..CopyOptions::default()
        };
        let err = transport
            .copy(&source, &destination, &PolicyContext::insecure_accept_anything(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let dir = source_dir(temp.path()).await;
        let layer_digest = DigestUtils::compute_docker_digest(b"layer-data");
        std::fs::write(directory::blob_path(&dir, &layer_digest).unwrap(), b"tampered").unwrap();

        let blobs = BlobSource::Directory(dir);
        let err = blobs.fetch(&layer_digest).await.unwrap_err();
        assert!(matches!(err, SyncError::DigestMismatch { .. }));
    }
}
