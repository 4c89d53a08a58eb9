//! `DocumentExecutor` Module
//!
//! Provides the `DocumentExecutor` trait that abstracts the database capabilities a
//! migration needs: running commands against a collection and managing indexes.
//!
//! The engine never talks to a driver directly. Migrations receive a
//! [`SchemaManager`](crate::migration::SchemaManager) wrapping one of these, so the same
//! migration runs against MongoDB in production and against
//! [`MemoryDatabase`](crate::memory::MemoryDatabase) in tests.

use mongodb::bson::Document;
use std::time::Duration;
use thiserror::Error;

use crate::migration::context::CancelReason;

/// `DocumentExecutor` error type
#[derive(Debug, Error)]
pub enum TideError {
    /// Error reported by the MongoDB driver
    #[error("MongoDB error: {0}")]
    Mongo(mongodb::error::Error),
    /// A unique index rejected the write
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    /// The referenced collection, index or document does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// BSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The caller's context was cancelled or ran out of time
    #[error("Operation aborted: {0}")]
    Cancelled(CancelReason),
    /// The migration lock lease could not be renewed from inside a step
    #[error("Lock lease lost: {0}")]
    LeaseLost(String),
    /// Other execution errors
    #[error("Execution error: {0}")]
    Other(String),
}

impl From<mongodb::error::Error> for TideError {
    fn from(err: mongodb::error::Error) -> Self {
        if crate::mongo::is_duplicate_key(&err) {
            TideError::DuplicateKey(err.to_string())
        } else {
            TideError::Mongo(err)
        }
    }
}

impl From<mongodb::bson::ser::Error> for TideError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        TideError::Serialization(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for TideError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        TideError::Serialization(err.to_string())
    }
}

impl From<CancelReason> for TideError {
    fn from(reason: CancelReason) -> Self {
        TideError::Cancelled(reason)
    }
}

/// Driver-neutral description of a secondary index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index name; `ensure_index` is idempotent per name
    pub name: String,
    /// Key pattern, e.g. `{ "organization_id": 1, "created_at": -1 }`
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
    /// TTL for documents indexed on a date field
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, keys: Document) -> Self {
        Self {
            name: name.into(),
            keys,
            unique: false,
            sparse: false,
            expire_after: None,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    #[must_use]
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }
}

/// Trait for executing schema-level operations against a document database
///
/// This is the "execute against collection X" and "ensure index" capability the
/// migration engine consumes. Connection pooling belongs to the implementation.
///
/// # Examples
///
/// ```no_run
/// use tidemark::{connect, DocumentExecutor, IndexSpec, MongoExecutor};
/// use mongodb::bson::doc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let database = connect("mongodb://localhost:27017", "platform")?;
/// let executor = MongoExecutor::new(database);
///
/// executor.ensure_index(
///     "controls",
///     &IndexSpec::new("controls_org_code", doc! { "organization_id": 1, "code": 1 }).unique(),
/// )?;
/// let touched = executor.update_many("controls", doc! {}, doc! { "$set": { "archived": false } })?;
/// # Ok(())
/// # }
/// ```
pub trait DocumentExecutor: Send + Sync {
    /// Run a raw database command and return the server's reply
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the command fails.
    fn run_command(&self, command: Document) -> Result<Document, TideError>;

    /// Create a collection; a collection that already exists is not an error
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the collection cannot be created.
    fn create_collection(&self, name: &str) -> Result<(), TideError>;

    /// Drop a collection and all of its indexes
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the drop fails.
    fn drop_collection(&self, name: &str) -> Result<(), TideError>;

    /// Create the index if no index with the same name exists
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the index cannot be built.
    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), TideError>;

    /// Drop an index by name
    ///
    /// # Errors
    ///
    /// Returns `TideError::NotFound` (or the driver's equivalent) if the index is missing.
    fn drop_index(&self, collection: &str, name: &str) -> Result<(), TideError>;

    /// List the index names present on a collection
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the listing fails.
    fn list_index_names(&self, collection: &str) -> Result<Vec<String>, TideError>;

    /// Apply `update` to every document matching `filter`, returning the number modified
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the update fails.
    fn update_many(&self, collection: &str, filter: Document, update: Document) -> Result<u64, TideError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_tide_error_display() {
        let err = TideError::Other("test error".to_string());
        assert!(err.to_string().contains("Execution error"));

        let err = TideError::DuplicateKey("version 3".to_string());
        assert!(err.to_string().contains("Duplicate key"));
        assert!(err.to_string().contains("version 3"));
    }

    #[test]
    fn test_cancel_reason_converts() {
        let err: TideError = CancelReason::DeadlineExceeded.into();
        assert!(matches!(err, TideError::Cancelled(CancelReason::DeadlineExceeded)));
    }

    #[test]
    fn test_index_spec_builder() {
        let spec = IndexSpec::new("audit_ttl", doc! { "created_at": 1 })
            .sparse()
            .expire_after(Duration::from_secs(3600));

        assert_eq!(spec.name, "audit_ttl");
        assert!(spec.sparse);
        assert!(!spec.unique);
        assert_eq!(spec.expire_after, Some(Duration::from_secs(3600)));
    }
}
