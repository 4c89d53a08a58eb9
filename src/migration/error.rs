//! Migration-specific error types

use crate::migration::context::CancelReason;
use crate::TideError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two definitions (or two records) share a version
    #[error("Migration version {version} already exists")]
    DuplicateVersion { version: i64 },

    /// The sorted version set is not contiguous from 1, or contains a version <= 0
    #[error(
        "Migration version {version} is out of sequence (expected {expected}).\n\
         Versions must start at 1 and increase by one; declare skipped versions as retired."
    )]
    NonSequentialVersion { version: i64, expected: i64 },

    /// A definition was registered without a description
    #[error("Migration version {version} has an empty description")]
    EmptyDescription { version: i64 },

    /// Another holder owns an unexpired lock
    #[error("Lock '{name}' is held by '{holder}' until {expires_at}")]
    LockBusy {
        name: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// `up`/`down` could not start because another process is migrating
    #[error(
        "Another process ('{holder}') is running migrations (lock '{lock}').\n\
         Retry once it finishes. If the holder crashed, the lock expires on its own."
    )]
    MigrationInProgress { lock: String, holder: String },

    /// The configured lease is too short to hold the lock across one step
    #[error("Lock TTL of {ttl:?} is below the minimum of {min:?}")]
    InvalidLockTtl { ttl: std::time::Duration, min: std::time::Duration },

    /// The lock expired and was taken over (or removed) while this run held it
    #[error("Lock '{name}' is no longer held by '{holder}'")]
    LockLost { name: String, holder: String },

    /// `apply` or `revert` returned an error; the run stopped at this version
    #[error("Migration {version} ('{description}') failed: {cause}")]
    MigrationFailed {
        version: i64,
        description: String,
        #[source]
        cause: TideError,
    },

    /// `down` was called with an empty history
    #[error("No migrations have been applied")]
    NoMigrationsApplied,

    /// The record store has no record for the version
    #[error("No migration record found for version {version}")]
    NotFound { version: i64 },

    /// A record exists for a version the registry does not define
    #[error(
        "Applied migration version {version} is not defined in this build.\n\
         Suggestion: deploy a build that contains it before migrating this database"
    )]
    UnknownVersion { version: i64 },

    /// A registered version below the current version has no record
    #[error("Migration history has a gap: version {missing} is missing but {current} is applied")]
    HistoryGap { missing: i64, current: i64 },

    /// The stored fingerprint no longer matches the definition
    #[error(
        "Migration {version} ('{description}') has been modified after being applied.\n\
         Stored checksum: {stored}\n\
         Current checksum: {current}"
    )]
    ChecksumMismatch {
        version: i64,
        description: String,
        stored: String,
        current: String,
    },

    /// The caller's context ended before the next step could start
    #[error("Migration run aborted{}: {reason}", before_version(.version))]
    Cancelled {
        reason: CancelReason,
        version: Option<i64>,
    },

    /// Record store, lock store or connection failure
    #[error("Database error: {0}")]
    Database(#[from] TideError),
}

impl MigrationError {
    /// `true` for errors a caller may resolve by retrying later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigrationError::LockBusy { .. } | MigrationError::MigrationInProgress { .. }
        )
    }

    /// Version the error is attached to, if any
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrationError::DuplicateVersion { version }
            | MigrationError::NonSequentialVersion { version, .. }
            | MigrationError::EmptyDescription { version }
            | MigrationError::MigrationFailed { version, .. }
            | MigrationError::NotFound { version }
            | MigrationError::UnknownVersion { version }
            | MigrationError::ChecksumMismatch { version, .. } => Some(*version),
            MigrationError::Cancelled { version, .. } => *version,
            MigrationError::HistoryGap { missing, .. } => Some(*missing),
            _ => None,
        }
    }
}

impl From<CancelReason> for MigrationError {
    fn from(reason: CancelReason) -> Self {
        MigrationError::Cancelled {
            reason,
            version: None,
        }
    }
}

fn before_version(version: &Option<i64>) -> String {
    version.map_or_else(String::new, |v| format!(" before version {v}"))
}
