//! Execution contexts and the YAML source-list configuration

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Registry credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse a `USERNAME[:PASSWORD]` command-line value
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(SyncError::Config("credentials can't be empty".to_string()));
        }

        let (username, password) = match value.split_once(':') {
            Some((user, pass)) => (user, pass),
            None => (value, ""),
        };

        if username.is_empty() {
            return Err(SyncError::Config(
                "username can't be empty in credentials".to_string(),
            ));
        }

        Ok(Self::new(username, password))
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// Per-source execution context: credentials and TLS policy.
///
/// Contexts are plain values. Deriving a per-registry context always produces
/// a new value, so units already running keep the snapshot they were given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemContext {
    pub credentials: Option<Credentials>,
    pub tls_verify: bool,
    pub cert_dir: Option<PathBuf>,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            credentials: None,
            tls_verify: true,
            cert_dir: None,
        }
    }
}

impl SystemContext {
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials.filter(|c| !c.is_empty());
        self
    }

    pub fn with_tls_verify(mut self, tls_verify: bool) -> Self {
        self.tls_verify = tls_verify;
        self
    }

    pub fn with_cert_dir(mut self, cert_dir: Option<PathBuf>) -> Self {
        self.cert_dir = cert_dir;
        self
    }

    /// Copy of this context with a registry entry's overrides applied.
    ///
    /// `tls-verify` always comes from the entry; `cert-dir` and `credentials`
    /// replace the base values only when the entry sets them.
    pub fn with_registry_overrides(&self, source: &RegistrySource) -> SystemContext {
        let mut derived = self.clone();
        derived.tls_verify = source.tls_verify;
        if let Some(cert_dir) = &source.cert_dir {
            derived.cert_dir = Some(cert_dir.clone());
        }
        if let Some(credentials) = source.credentials.as_ref().filter(|c| !c.is_empty()) {
            derived.credentials = Some(credentials.clone());
        }
        derived
    }
}

fn default_tls_verify() -> bool {
    true
}

/// One registry entry of the YAML source list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySource {
    #[serde(rename = "tls-verify", default = "default_tls_verify")]
    pub tls_verify: bool,

    #[serde(rename = "cert-dir", default)]
    pub cert_dir: Option<PathBuf>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Repository name to explicit tags; no tags means "all tags"
    #[serde(default)]
    pub images: BTreeMap<String, Option<Vec<String>>>,
}

impl RegistrySource {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Configured repositories with their explicit tag lists
    pub fn repositories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.images
            .iter()
            .map(|(name, tags)| (name.as_str(), tags.as_deref().unwrap_or(&[])))
    }
}

/// Multi-registry source list read with `--source-yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceConfig {
    pub registries: BTreeMap<String, RegistrySource>,
}

impl SourceConfig {
    /// Load the source list from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}
