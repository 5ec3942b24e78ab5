//! `dir:` transport layout
//!
//! One image per directory: `manifest.json`, a `version` marker and one file
//! per blob named by the hex part of its sha256 digest.

use crate::error::{Result, SyncError};
use crate::image::manifest::ManifestSummary;
use crate::image::DigestUtils;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VERSION_FILE: &str = "version";
pub const VERSION_CONTENT: &str = "Directory Transport Version: 1.1\n";

/// Every directory under `base` (inclusive) that holds a `manifest.json`
pub fn list_images(base: &Path) -> Result<Vec<PathBuf>> {
    if !base.is_dir() {
        return Err(SyncError::SourceParse(format!(
            "'{}' is not a directory",
            base.display()
        )));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(base).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() && has_manifest(entry.path()) {
            images.push(entry.into_path());
        }
    }

    images.sort();
    Ok(images)
}

pub fn has_manifest(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

pub fn blob_path(dir: &Path, digest: &str) -> Result<PathBuf> {
    Ok(dir.join(DigestUtils::extract_hex_part(digest)?))
}

pub async fn read_manifest_bytes(dir: &Path) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(dir.join(MANIFEST_FILE)).await?)
}

pub async fn read_manifest(dir: &Path) -> Result<ManifestSummary> {
    let data = read_manifest_bytes(dir).await?;
    Ok(ManifestSummary::from_slice(&data)?)
}

pub async fn read_blob(dir: &Path, digest: &str) -> Result<Vec<u8>> {
    let path = blob_path(dir, digest)?;
    tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            SyncError::NotFound(format!("blob {} in {}", digest, dir.display()))
        }
        _ => SyncError::Io(e),
    })
}

/// Writes one image into a directory, replacing a previous copy
#[derive(Debug)]
pub struct DirectoryWriter {
    dir: PathBuf,
}

impl DirectoryWriter {
    /// Prepare `dir` for writing.
    ///
    /// An existing image directory is emptied first; any other non-empty
    /// directory is refused.
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            files.push((entry.path(), entry.file_type().await?.is_file()));
        }

        if !files.is_empty() {
            if !dir.join(VERSION_FILE).is_file() {
                return Err(SyncError::Unsupported(format!(
                    "refusing to overwrite non-image directory {}",
                    dir.display()
                )));
            }
            for (path, is_file) in files {
                if is_file {
                    tokio::fs::remove_file(&path).await?;
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    async fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        let temp = self.dir.join(format!(".{}.{}", name, uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, data).await?;
        tokio::fs::rename(&temp, self.dir.join(name)).await?;
        Ok(())
    }

    pub async fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        let name = DigestUtils::extract_hex_part(digest)?.to_string();
        self.write_atomic(&name, data).await
    }

    pub async fn put_manifest(&self, data: &[u8]) -> Result<()> {
        self.write_atomic(MANIFEST_FILE, data).await
    }

    /// Mark the directory as a complete image
    pub async fn commit(self) -> Result<()> {
        self.write_atomic(VERSION_FILE, VERSION_CONTENT.as_bytes()).await
    }
}
