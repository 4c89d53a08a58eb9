//! Platform migrations shipped with the CLI
//!
//! Add a new migration as `mNNNN_<name>.rs` and register it in [`registry`].
//! Never edit the description of a published migration; its checksum is stored.

mod m0001_create_indexes;
mod m0002_add_audit_indexes;

pub use m0001_create_indexes::CreateIndexes;
pub use m0002_add_audit_indexes::AddAuditIndexes;

use tidemark::migration::{MigrationError, MigrationRegistry};

/// The platform registry, validated
pub fn registry() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::builder()
        .register(CreateIndexes)
        .register(AddAuditIndexes)
        .build()
}
