//! Checksum calculation for migration definitions
//!
//! The fingerprint covers only the version and description. It flags a definition
//! that was renamed or renumbered after deployment; it is not a tamper-proof seal.

use crate::migration::MigrationError;
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 fingerprint of a migration definition
///
/// # Returns
///
/// Returns the 64-character lowercase hexadecimal digest of `"{version}:{description}"`
pub fn calculate_checksum(version: i64, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate checksum against stored value
///
/// # Errors
///
/// Returns `MigrationError::ChecksumMismatch` if the stored fingerprint differs from
/// the one computed for the current definition.
pub fn validate_checksum(
    version: i64,
    description: &str,
    stored_checksum: &str,
) -> Result<(), MigrationError> {
    let current = calculate_checksum(version, description);
    if stored_checksum == current {
        Ok(())
    } else {
        Err(MigrationError::ChecksumMismatch {
            version,
            description: description.to_string(),
            stored: stored_checksum.to_string(),
            current,
        })
    }
}
