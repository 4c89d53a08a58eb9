//! MongoDB backend
//!
//! Blocking implementations of the three capabilities the migrator consumes:
//! [`MongoExecutor`] for schema work, [`MongoRecordStore`] for the
//! `schema_migrations` collection and [`MongoLockCoordinator`] for the
//! `migration_locks` collection.

mod executor;
mod lock;
mod records;

pub use executor::MongoExecutor;
pub use lock::MongoLockCoordinator;
pub use records::MongoRecordStore;

use crate::config::MigrationSettings;
use crate::migration::{MigrationRegistry, Migrator};
use crate::{DocumentExecutor, IndexSpec, TideError};
use mongodb::bson::doc;
use mongodb::error::{Error, ErrorKind, WriteFailure};
use mongodb::sync::Database;
use std::sync::Arc;

/// Server code for a unique index violation
pub const DUPLICATE_KEY_CODE: i32 = 11000;
/// Server code for `createCollection` on an existing collection
pub(crate) const NAMESPACE_EXISTS_CODE: i32 = 48;
/// Server code for a command against a missing collection
pub(crate) const NAMESPACE_NOT_FOUND_CODE: i32 = 26;
/// Server code for `dropIndexes` with an unknown name
pub(crate) const INDEX_NOT_FOUND_CODE: i32 = 27;

/// Name of the unique index guarding one record per version
pub const RECORD_VERSION_INDEX: &str = "schema_migrations_version_unique";
/// Name of the index serving the expiry filter of lock acquisition
pub const LOCK_EXPIRY_INDEX: &str = "migration_locks_expires_at";

/// Server error code carried by a command or write error
pub(crate) fn error_code(err: &Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(e) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => Some(e.code),
        _ => None,
    }
}

/// `true` when the server rejected a write because of a unique index
pub fn is_duplicate_key(err: &Error) -> bool {
    error_code(err) == Some(DUPLICATE_KEY_CODE)
}

/// Create the state collections, the unique index on record versions and the
/// lock expiry index
///
/// Idempotent. `up`/`down` do the same on first use; call this directly to
/// provision a database ahead of time.
///
/// # Errors
///
/// Returns `TideError` if a collection or index cannot be created.
pub fn initialize_state_collections(
    executor: &dyn DocumentExecutor,
    settings: &MigrationSettings,
) -> Result<(), TideError> {
    create_records_collection(executor, &settings.records_collection)?;
    create_locks_collection(executor, &settings.locks_collection)?;

    log::debug!(
        "initialized state collections '{}' and '{}'",
        settings.records_collection,
        settings.locks_collection
    );
    Ok(())
}

pub(crate) fn create_records_collection(executor: &dyn DocumentExecutor, name: &str) -> Result<(), TideError> {
    executor.create_collection(name)?;
    executor.ensure_index(name, &IndexSpec::new(RECORD_VERSION_INDEX, doc! { "version": 1 }).unique())
}

pub(crate) fn create_locks_collection(executor: &dyn DocumentExecutor, name: &str) -> Result<(), TideError> {
    executor.create_collection(name)?;
    executor.ensure_index(name, &IndexSpec::new(LOCK_EXPIRY_INDEX, doc! { "expires_at": 1 }))
}

impl Migrator {
    /// Create a Migrator backed by one MongoDB database
    ///
    /// Nothing is written here. The state collections and their indexes are
    /// created by the first `up`/`down`, so read-only commands work with
    /// read-only credentials.
    pub fn for_mongo(registry: Arc<MigrationRegistry>, database: &Database, settings: &MigrationSettings) -> Self {
        let executor = Arc::new(MongoExecutor::new(database.clone()));
        let store = Arc::new(MongoRecordStore::new(database, &settings.records_collection));
        let locks = Arc::new(MongoLockCoordinator::new(database, &settings.locks_collection));

        Migrator::new(registry, executor, store, locks).with_config(settings.migrator_config())
    }
}
