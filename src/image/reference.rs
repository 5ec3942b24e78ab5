//! Transport locators and image references
//!
//! A [`Locator`] is what the user typed (`docker://host/repo[:tag]` or
//! `dir:/path`). An [`ImageReference`] names exactly one image at a source or
//! destination and is immutable once resolved.

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

pub const DOCKER_HUB_REGISTRY: &str = "docker.io";
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Transports understood by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Docker,
    Directory,
}

impl TransportKind {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "docker" => Some(TransportKind::Docker),
            "dir" => Some(TransportKind::Directory),
            _ => None,
        }
    }
}

/// A parsed SOURCE or DESTINATION argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `docker://host[:port]/path`; `path` has no leading slash and may be empty
    Docker { host: String, path: String },
    /// `dir:/some/path`
    Directory { path: PathBuf },
}

impl Locator {
    /// Parse a `transport:...` locator string.
    ///
    /// The error is a bare message; callers decide whether it is a source or
    /// destination parse failure.
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let (scheme, rest) = value
            .split_once(':')
            .ok_or_else(|| format!("No transport specified in '{}'", value))?;

        match TransportKind::from_scheme(scheme) {
            Some(TransportKind::Directory) => {
                if rest.is_empty() {
                    return Err(format!("No path specified in '{}'", value));
                }
                Ok(Locator::Directory {
                    path: PathBuf::from(rest),
                })
            }
            Some(TransportKind::Docker) => {
                let url = Url::parse(value).map_err(|e| format!("Invalid URL '{}': {}", value, e))?;
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| format!("No registry host specified in '{}'", value))?;
                let host = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                Ok(Locator::Docker {
                    host,
                    path: url.path().trim_matches('/').to_string(),
                })
            }
            None => Err(format!("Unknown transport '{}'", scheme)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Locator::Docker { .. } => TransportKind::Docker,
            Locator::Directory { .. } => TransportKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == TransportKind::Directory
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Docker { host, path } if path.is_empty() => write!(f, "docker://{}", host),
            Locator::Docker { host, path } => write!(f, "docker://{}/{}", host, path),
            Locator::Directory { path } => write!(f, "dir:{}", path.display()),
        }
    }
}

/// A registry-hosted repository, optionally tagged
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerReference {
    registry: String,
    repository: String,
    tag: Option<String>,
}

impl DockerReference {
    /// Parse `[registry/]repository[:tag]` with Docker Hub normalization
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let value = value.trim_start_matches("//");
        if value.is_empty() {
            return Err("empty image reference".to_string());
        }
        if value.contains('@') {
            return Err(format!("digest references are not supported: '{}'", value));
        }

        let (registry, remainder) = match value.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => (first.to_string(), rest),
            _ => (DOCKER_HUB_REGISTRY.to_string(), value),
        };

        let (name, tag) = match remainder.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
            _ => (remainder, None),
        };

        let repository = if registry == DOCKER_HUB_REGISTRY && !name.contains('/') {
            format!("library/{}", name)
        } else {
            name.to_string()
        };

        validate_repository(&repository)?;
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.map(str::to_string),
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// `registry/repository` without the tag
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Host to talk to for API requests
    pub fn api_host(&self) -> &str {
        if self.registry == DOCKER_HUB_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    pub fn with_tag(&self, tag: &str) -> std::result::Result<Self, String> {
        validate_tag(tag)?;
        Ok(Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
        })
    }

    /// Tag to push/pull, defaulting to `latest`
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }
}

impl fmt::Display for DockerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            None => write!(f, "{}/{}", self.registry, self.repository),
        }
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    if repository.is_empty() || repository.len() > 255 {
        return Err(format!("invalid repository name length: '{}'", repository));
    }
    for component in repository.split('/') {
        let valid = !component.is_empty()
            && component
                .chars()
                .all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                })
            && component.starts_with(|c: char| c.is_ascii_alphanumeric())
            && component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !valid {
            return Err(format!("invalid repository name: '{}'", repository));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && tag.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid tag format: '{}'", tag))
    }
}

/// One fully-qualified image at a source or destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageReference {
    Docker(DockerReference),
    Directory(PathBuf),
}

impl ImageReference {
    pub fn kind(&self) -> TransportKind {
        match self {
            ImageReference::Docker(_) => TransportKind::Docker,
            ImageReference::Directory(_) => TransportKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == TransportKind::Directory
    }

    pub fn as_directory(&self) -> Option<&Path> {
        match self {
            ImageReference::Directory(path) => Some(path),
            ImageReference::Docker(_) => None,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Docker(reference) => write!(f, "docker://{}", reference),
            ImageReference::Directory(path) => write!(f, "dir:{}", path.display()),
        }
    }
}

/// Join slash-separated path fragments, dropping empty pieces
fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Compute where `source` lands under `destination`.
///
/// Registry sources keep their fully-qualified `registry/repo:tag` path under
/// the destination root. Directory sources keep their path relative to
/// `dir_base_path`.
pub fn build_destination(
    source: &ImageReference,
    destination: &Locator,
    dir_base_path: Option<&Path>,
) -> Result<ImageReference> {
    match (destination, source) {
        (Locator::Docker { host, path }, ImageReference::Directory(image_dir)) => {
            let relative = match dir_base_path {
                Some(base) => image_dir.strip_prefix(base).unwrap_or(image_dir),
                None => image_dir.as_path(),
            };
            let relative = relative.to_string_lossy();
            let joined = join_path(&[host, path, &relative]);
            DockerReference::parse(&joined)
                .map(ImageReference::Docker)
                .map_err(SyncError::DestinationParse)
        }
        (Locator::Docker { host, path }, ImageReference::Docker(reference)) => {
            let joined = join_path(&[host, path, &reference.to_string()]);
            DockerReference::parse(&joined)
                .map(ImageReference::Docker)
                .map_err(SyncError::DestinationParse)
        }
        (Locator::Directory { path }, ImageReference::Docker(reference)) => {
            Ok(ImageReference::Directory(path.join(reference.to_string())))
        }
        (Locator::Directory { .. }, ImageReference::Directory(_)) => Err(SyncError::Unsupported(
            "registry-sync from 'dir:' to 'dir:' not implemented, use something like rsync instead"
                .to_string(),
        )),
    }
}
