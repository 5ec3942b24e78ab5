//! Error types for registry sync operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad command-line invocation
    #[error("{0}")]
    Usage(String),
    /// Malformed SOURCE locator
    #[error("Error while parsing source: {0}")]
    SourceParse(String),
    /// Malformed DESTINATION locator
    #[error("Error while parsing destination: {0}")]
    DestinationParse(String),
    /// A source resolved to zero tagged images
    #[error("No images to registry-sync found in {0}")]
    NoImagesFound(String),
    /// A single tag could not be turned into a reference
    #[error("Error processing tag '{tag}': {reason}")]
    TagParse { tag: String, reason: String },
    #[error("Error inspecting image '{image}': {source}")]
    Inspect {
        image: String,
        source: Box<SyncError>,
    },
    #[error("Error copying tag '{image}' after {attempts} attempt(s): {source}")]
    Copy {
        image: String,
        attempts: u32,
        source: Box<SyncError>,
    },
    /// The shared run deadline elapsed
    #[error("Operation '{0}' timed out")]
    Timeout(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Signature policy error: {0}")]
    Policy(String),
    #[error("Not supported: {0}")]
    Unsupported(String),
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("Worker error: {0}")]
    Worker(String),
    /// Run finished but some units failed after exhausting retries
    #[error("{failed} of {total} image(s) failed to sync")]
    Incomplete { failed: usize, total: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Io(_) | SyncError::DigestMismatch { .. } => true,
            SyncError::Copy { source, .. } | SyncError::Inspect { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound(_) => true,
            SyncError::Copy { source, .. } | SyncError::Inspect { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::Timeout(_) => true,
            SyncError::Copy { source, .. } | SyncError::Inspect { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "registry request")
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("Invalid URL: {}", err))
    }
}
