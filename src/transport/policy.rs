//! Signature policy consulted before every copy
//!
//! Understands the `default` section of a containers `policy.json`. Only the
//! `insecureAcceptAnything` and `reject` requirements can be evaluated; any
//! signature-verifying requirement rejects the image.

use crate::error::{Result, SyncError};
use crate::image::ImageReference;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const SYSTEM_POLICY_PATH: &str = "/etc/containers/policy.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum PolicyRequirement {
    #[serde(rename = "insecureAcceptAnything")]
    InsecureAcceptAnything,
    #[serde(rename = "reject")]
    Reject,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    default: Vec<PolicyRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyContext {
    requirements: Vec<PolicyRequirement>,
}

impl PolicyContext {
    pub fn insecure_accept_anything() -> Self {
        Self {
            requirements: vec![PolicyRequirement::InsecureAcceptAnything],
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(json)
            .map_err(|e| SyncError::Policy(format!("invalid policy: {}", e)))?;
        Ok(Self {
            requirements: file.default,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Policy(format!("Error loading trust policy {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Resolve the policy the way the containers tools do: explicit path,
    /// then the user policy, then the system policy.
    pub fn load(path: Option<&Path>, insecure: bool) -> Result<Self> {
        if insecure {
            return Ok(Self::insecure_accept_anything());
        }
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let user_policy = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/containers/policy.json"));
        Self::first_existing(user_policy.into_iter().chain([PathBuf::from(SYSTEM_POLICY_PATH)]))
    }

    fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let mut searched = Vec::new();
        for candidate in candidates {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Using signature policy");
                return Self::from_file(&candidate);
            }
            searched.push(candidate.display().to_string());
        }

        Err(SyncError::Policy(format!(
            "Error loading trust policy: none found in {}",
            searched.join(", ")
        )))
    }

    /// Check whether `image` may be copied
    pub fn check(&self, image: &ImageReference) -> Result<()> {
        if self.requirements.is_empty() {
            return Err(SyncError::Policy(
                "policy has no default requirements".to_string(),
            ));
        }

        for requirement in &self.requirements {
            match requirement {
                PolicyRequirement::InsecureAcceptAnything => {}
                PolicyRequirement::Reject => {
                    return Err(SyncError::Policy(format!(
                        "Running image {} is rejected by policy",
                        image
                    )));
                }
                PolicyRequirement::Unsupported => {
                    return Err(SyncError::Policy(format!(
                        "Signature verification is not supported, rejecting {}",
                        image
                    )));
                }
            }
        }
        Ok(())
    }
}
