//! Migration system for Tidemark
//!
//! This module provides the infrastructure for versioned schema migrations, including:
//! - Migration trait definition and the closure-based [`MigrationDefinition`]
//! - [`MigrationRegistry`], validated once at startup
//! - [`RecordStore`] and [`LockCoordinator`] capabilities
//! - [`Migrator`] for `up`, `down`, status and validation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mongodb::bson::doc;
//! use tidemark::memory::MemoryDatabase;
//! use tidemark::migration::{MigrationContext, MigrationDefinition, MigrationRegistry, Migrator};
//! use tidemark::IndexSpec;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = MigrationRegistry::builder()
//!     .register(MigrationDefinition::new(
//!         1,
//!         "create control indexes",
//!         |_, manager| {
//!             manager.create_index(
//!                 "controls",
//!                 IndexSpec::new("controls_org_code", doc! { "organization_id": 1, "code": 1 }).unique(),
//!             )
//!         },
//!         |_, manager| manager.drop_index("controls", "controls_org_code"),
//!     ))
//!     .build()?;
//!
//! let migrator = Migrator::with_backend(Arc::new(registry), Arc::new(MemoryDatabase::new()));
//! let version = migrator.up(&MigrationContext::with_timeout(Duration::from_secs(300)))?;
//! assert_eq!(version, 1);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod context;
pub mod error;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod record;
pub mod registry;
pub mod schema_manager;
pub mod startup;
pub mod status;
pub mod store;

pub use checksum::{calculate_checksum, validate_checksum};
pub use context::{CancelReason, MigrationContext};
pub use error::MigrationError;
pub use lock::{LockCoordinator, LockHandle, LockInfo, MigrationLockGuard, DEFAULT_LOCK_NAME};
pub use migration::{Migration, MigrationDefinition};
pub use migrator::{Migrator, MigratorConfig, DEFAULT_LOCK_TTL, EVENT_TARGET, MIN_LOCK_TTL};
pub use record::MigrationRecord;
pub use registry::{MigrationRegistry, MigrationRegistryBuilder};
pub use schema_manager::SchemaManager;
pub use startup::startup_migrations;
pub use status::{MigrationStatus, PendingMigration};
pub use store::RecordStore;

// Re-export for convenience
pub use crate::TideError;
