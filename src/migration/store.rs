//! Record store abstraction for applied migrations

use crate::migration::{MigrationError, MigrationRecord};

/// Durable bookkeeping of which versions have been applied
///
/// Implementations only store records. Keeping the applied set a prefix of the
/// registry is the migrator's job.
pub trait RecordStore: Send + Sync {
    /// Highest applied version, or 0 when nothing has been applied
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the read fails.
    fn current_version(&self) -> Result<i64, MigrationError>;

    /// Insert a record for a freshly applied version
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateVersion` if a record for the version already
    /// exists (a concurrent double-apply), or `MigrationError::Database`.
    fn append(&self, record: &MigrationRecord) -> Result<(), MigrationError>;

    /// Delete the record of a reverted version
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::NotFound` if no record exists for the version, or
    /// `MigrationError::Database`.
    fn remove(&self, version: i64) -> Result<(), MigrationError>;

    /// All records, ascending by version
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the read fails.
    fn history(&self) -> Result<Vec<MigrationRecord>, MigrationError>;

    /// Create whatever storage the store needs before its first write
    ///
    /// Called by the migrator before `up`/`down`, never for reads. Must be
    /// idempotent. The default does nothing.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the storage cannot be created.
    fn initialize_records(&self) -> Result<(), MigrationError> {
        Ok(())
    }
}
