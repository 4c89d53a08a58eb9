//! SchemaManager - Provides methods for schema operations in migrations

use crate::migration::{MigrationError, MigrationLockGuard};
use crate::{DocumentExecutor, IndexSpec, TideError};
use mongodb::bson::Document;

/// SchemaManager provides methods for performing schema operations in migrations
///
/// This struct borrows a `DocumentExecutor` and provides convenient methods for
/// common schema operations like creating collections, building indexes and
/// backfilling fields. Inside a migrator run it also carries the migration lock,
/// so a long step can renew its lease with [`renew_lease`](Self::renew_lease).
pub struct SchemaManager<'a> {
    executor: &'a dyn DocumentExecutor,
    lease: Option<&'a MigrationLockGuard<'a>>,
}

impl<'a> SchemaManager<'a> {
    /// Create a new SchemaManager with the given executor
    pub fn new(executor: &'a dyn DocumentExecutor) -> Self {
        Self { executor, lease: None }
    }

    /// A SchemaManager whose steps can renew `lease`
    pub fn with_lease(executor: &'a dyn DocumentExecutor, lease: &'a MigrationLockGuard<'a>) -> Self {
        Self {
            executor,
            lease: Some(lease),
        }
    }

    /// Push the migration lock's expiry out by its full TTL
    ///
    /// Steps that may outlive the lock TTL (large backfills, index builds on big
    /// collections) should call this between batches. Without a lease it does nothing.
    ///
    /// # Errors
    ///
    /// Returns `TideError::LeaseLost` if the lock expired and another process took it;
    /// the step should stop writing and return the error.
    pub fn renew_lease(&self) -> Result<(), TideError> {
        let Some(lease) = self.lease else {
            return Ok(());
        };
        lease.extend().map_err(|e| match e {
            MigrationError::Database(inner) => inner,
            other => TideError::LeaseLost(other.to_string()),
        })
    }

    /// Create a collection (no-op if it exists)
    pub fn create_collection(&self, name: &str) -> Result<(), TideError> {
        self.executor.create_collection(name)
    }

    /// Drop a collection
    pub fn drop_collection(&self, name: &str) -> Result<(), TideError> {
        self.executor.drop_collection(name)
    }

    /// Create an index
    ///
    /// # Example
    /// ```rust,no_run
    /// use mongodb::bson::doc;
    /// use tidemark::IndexSpec;
    /// # fn f(manager: &tidemark::migration::SchemaManager<'_>) -> Result<(), tidemark::TideError> {
    ///
    /// manager.create_index(
    ///     "evidence",
    ///     IndexSpec::new("evidence_control_id", doc! { "control_id": 1 }),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), TideError> {
        self.executor.ensure_index(collection, &index)
    }

    /// Create several indexes on one collection, stopping at the first failure
    pub fn create_indexes(
        &self,
        collection: &str,
        indexes: impl IntoIterator<Item = IndexSpec>,
    ) -> Result<(), TideError> {
        for index in indexes {
            self.executor.ensure_index(collection, &index)?;
        }
        Ok(())
    }

    /// Drop an index
    pub fn drop_index(&self, collection: &str, name: &str) -> Result<(), TideError> {
        self.executor.drop_index(collection, name)
    }

    /// Drop an index, treating a missing index as already dropped
    ///
    /// Makes `revert` safe to rerun after a partially applied migration.
    pub fn drop_index_if_exists(&self, collection: &str, name: &str) -> Result<(), TideError> {
        if self.has_index(collection, name)? {
            self.executor.drop_index(collection, name)
        } else {
            Ok(())
        }
    }

    pub fn has_index(&self, collection: &str, name: &str) -> Result<bool, TideError> {
        Ok(self
            .executor
            .list_index_names(collection)?
            .iter()
            .any(|existing| existing == name))
    }

    /// Backfill or reshape documents
    ///
    /// # Example
    /// ```rust,no_run
    /// use mongodb::bson::doc;
    /// # fn f(manager: &tidemark::migration::SchemaManager<'_>) -> Result<(), tidemark::TideError> {
    ///
    /// manager.update_many(
    ///     "controls",
    ///     doc! { "status": { "$exists": false } },
    ///     doc! { "$set": { "status": "draft" } },
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn update_many(&self, collection: &str, filter: Document, update: Document) -> Result<u64, TideError> {
        self.executor.update_many(collection, filter, update)
    }

    /// Run a raw database command
    pub fn execute(&self, command: Document) -> Result<Document, TideError> {
        self.executor.run_command(command)
    }

    /// Get a reference to the underlying executor
    pub fn executor(&self) -> &dyn DocumentExecutor {
        self.executor
    }
}
