//! Image references, manifests and digests

pub mod digest;
pub mod manifest;
pub mod reference;

pub use digest::DigestUtils;
pub use manifest::{ImageInspectInfo, ManifestSummary, Platform};
pub use reference::{build_destination, DockerReference, ImageReference, Locator, TransportKind};
