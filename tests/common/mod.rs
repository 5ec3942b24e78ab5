//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use registry_sync::config::SystemContext;
use registry_sync::image::manifest::Descriptor;
use registry_sync::image::{DockerReference, ImageInspectInfo, ImageReference, ManifestSummary};
use registry_sync::{CopyOptions, ImageTransport, PolicyContext, Result, SyncError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FakeTransport {
    tags: Mutex<HashMap<String, Vec<String>>>,
    broken_repositories: HashSet<String>,
    images: Mutex<HashMap<String, ImageInspectInfo>>,
    directory_images: HashMap<PathBuf, Vec<PathBuf>>,
    /// Manifests written by successful copies, keyed by destination reference
    destination_manifests: Mutex<HashMap<String, ManifestSummary>>,
    failing_copies: HashSet<String>,
    failing_inspects: HashSet<String>,
    copy_delay: Duration,

    copies: Mutex<Vec<(String, String)>>,
    copy_attempts: Mutex<HashMap<String, usize>>,
    inspect_contexts: Mutex<HashMap<String, SystemContext>>,
    list_calls: AtomicUsize,
    inspect_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `repository` is `registry/name`
    pub fn with_tags(self, repository: &str, tags: &[&str]) -> Self {
        self.tags.lock().unwrap().insert(
            repository.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_broken_repository(mut self, repository: &str) -> Self {
        self.broken_repositories.insert(repository.to_string());
        self
    }

    /// `image` is the `docker://…` or `dir:…` form
    pub fn with_image(self, image: &str, architecture: &str, layers: &[&str]) -> Self {
        self.set_image(image, architecture, layers);
        self
    }

    pub fn with_directory(mut self, base: &Path, images: &[&str]) -> Self {
        self.directory_images.insert(
            base.to_path_buf(),
            images.iter().map(|i| base.join(i)).collect(),
        );
        self
    }

    pub fn with_failing_copy(mut self, image: &str) -> Self {
        self.failing_copies.insert(image.to_string());
        self
    }

    pub fn with_failing_inspect(mut self, image: &str) -> Self {
        self.failing_inspects.insert(image.to_string());
        self
    }

    pub fn with_copy_delay(mut self, delay: Duration) -> Self {
        self.copy_delay = delay;
        self
    }

    pub fn set_image(&self, image: &str, architecture: &str, layers: &[&str]) {
        self.images.lock().unwrap().insert(
            image.to_string(),
            ImageInspectInfo {
                architecture: architecture.to_string(),
                os: "linux".to_string(),
                layers: layers.iter().map(|l| l.to_string()).collect(),
                digest: None,
            },
        );
    }

    pub fn copy_count(&self) -> usize {
        self.copies.lock().unwrap().len()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn attempts(&self, image: &str) -> usize {
        self.copy_attempts
            .lock()
            .unwrap()
            .get(image)
            .copied()
            .unwrap_or(0)
    }

    pub fn inspect_context(&self, image: &str) -> Option<SystemContext> {
        self.inspect_contexts.lock().unwrap().get(image).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn info_for(&self, image: &str) -> ImageInspectInfo {
        self.images
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_else(|| ImageInspectInfo {
                architecture: "amd64".to_string(),
                os: "linux".to_string(),
                layers: vec![format!("sha256:layer-of-{}", image)],
                digest: None,
            })
    }
}

fn manifest_for(layers: &[String]) -> ManifestSummary {
    ManifestSummary {
        schema_version: 2,
        media_type: "application/vnd.docker.distribution.manifest.v2+json".to_string(),
        config: Descriptor {
            media_type: "application/vnd.docker.container.image.v1+json".to_string(),
            size: 100,
            digest: "sha256:config".to_string(),
        },
        layers: layers
            .iter()
            .map(|digest| Descriptor {
                media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_string(),
                size: 1000,
                digest: digest.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl ImageTransport for FakeTransport {
    async fn list_tags(
        &self,
        repository: &DockerReference,
        _ctx: &SystemContext,
    ) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let name = repository.name();
        if self.broken_repositories.contains(&name) {
            return Err(SyncError::Network(format!("connection reset listing {}", name)));
        }
        self.tags
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(name))
    }

    fn list_directory_images(&self, base: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.directory_images.get(base).cloned().unwrap_or_default())
    }

    async fn inspect(
        &self,
        image: &ImageReference,
        ctx: &SystemContext,
    ) -> Result<ImageInspectInfo> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        let key = image.to_string();
        self.inspect_contexts
            .lock()
            .unwrap()
            .insert(key.clone(), ctx.clone());
        if self.failing_inspects.contains(&key) {
            return Err(SyncError::Auth(format!("denied: {}", key)));
        }
        Ok(self.info_for(&key))
    }

    async fn manifest_exists_at(&self, image: &ImageReference) -> bool {
        self.destination_manifests
            .lock()
            .unwrap()
            .contains_key(&image.to_string())
    }

    async fn read_destination_manifest(&self, image: &ImageReference) -> Result<ManifestSummary> {
        let key = image.to_string();
        self.destination_manifests
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(SyncError::NotFound(key))
    }

    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        policy: &PolicyContext,
        _options: &CopyOptions,
    ) -> Result<()> {
        policy.check(source)?;
        let key = source.to_string();
        *self.copy_attempts.lock().unwrap().entry(key.clone()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.copy_delay.is_zero() {
            tokio::time::sleep(self.copy_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_copies.contains(&key) {
            return Err(SyncError::Network(format!("broken pipe copying {}", key)));
        }

        let info = self.info_for(&key);
        self.destination_manifests
            .lock()
            .unwrap()
            .insert(destination.to_string(), manifest_for(&info.layers));
        self.copies
            .lock()
            .unwrap()
            .push((key, destination.to_string()));
        Ok(())
    }
}
