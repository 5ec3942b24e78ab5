//! Registry Sync Library
//!
//! Mirrors container images from a registry repository, a local directory or
//! a YAML list of registries into a registry or directory, copying only what
//! changed with a bounded number of concurrent workers.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;
pub mod sync;
pub mod transport;

pub use config::{Credentials, SourceConfig, SystemContext};
pub use error::{Result, SyncError};
pub use sync::{SyncDriver, SyncOptions, SyncReport};
pub use transport::{CopyOptions, DefaultTransport, ImageTransport, PolicyContext};
