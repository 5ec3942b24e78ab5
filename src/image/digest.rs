//! SHA256 digest utilities for blob verification

use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};

/// Utilities for working with `sha256:` content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute the full `sha256:<hex>` digest of some bytes
    pub fn compute_docker_digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Extract the hex part of a `sha256:` digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        match digest.strip_prefix("sha256:") {
            Some(hex_part) if Self::is_valid_sha256_hex(hex_part) => Ok(hex_part),
            _ => Err(SyncError::Registry(format!(
                "Unsupported or malformed digest: {}",
                digest
            ))),
        }
    }

    /// Check downloaded content against the digest it was requested by
    pub fn verify(expected: &str, data: &[u8]) -> Result<()> {
        let actual = Self::compute_docker_digest(data);
        if actual == expected {
            Ok(())
        } else {
            Err(SyncError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_digest() {
        assert_eq!(DigestUtils::compute_docker_digest(b""), EMPTY);
    }

    #[test]
    fn test_verify() {
        assert!(DigestUtils::verify(EMPTY, b"").is_ok());
        let err = DigestUtils::verify(EMPTY, b"tampered").unwrap_err();
        assert!(matches!(err, SyncError::DigestMismatch { .. }));
    }

    #[test]
    fn test_extract_hex_part() {
        assert_eq!(DigestUtils::extract_hex_part(EMPTY).unwrap(), &EMPTY[7..]);
        assert!(DigestUtils::extract_hex_part("sha512:abcd").is_err());
        assert!(DigestUtils::extract_hex_part("sha256:../../etc").is_err());
    }
}
