//! # Tidemark
//!
//! Versioned, lock-protected schema migrations for MongoDB.
//!
//! Migrations are registered once at startup, applied in ascending version order
//! under a lease-style lock shared by every replica, and recorded so that each
//! version is applied at most once. See [`migration`] for the engine and [`mongo`]
//! for the production backend.

pub mod config;
pub mod connection;
pub mod executor;
pub mod memory;
pub mod migration;
pub mod mongo;

pub use config::{DatabaseSettings, MigrationSettings, TidemarkConfig};
pub use connection::{connect, ConnectionError};
pub use executor::{DocumentExecutor, IndexSpec, TideError};
pub use memory::MemoryDatabase;
pub use migration::{MigrationContext, MigrationError, MigrationRegistry, Migrator};
pub use mongo::{initialize_state_collections, MongoExecutor, MongoLockCoordinator, MongoRecordStore};
