//! Migration trait definition

use super::context::MigrationContext;
use super::schema_manager::SchemaManager;
use crate::TideError;

/// Trait that all migrations must implement
///
/// A migration is one versioned, reversible schema change. `apply` moves the
/// database from `version - 1` to `version`; `revert` moves it back.
///
/// Both operations share one signature so the migrator can dispatch them
/// uniformly. They are synchronous: index builds block the calling thread, and
/// implementations doing long work should call `ctx.check()?` between batches.
///
/// # Example
///
/// ```rust,no_run
/// use mongodb::bson::doc;
/// use tidemark::migration::{Migration, MigrationContext, SchemaManager};
/// use tidemark::{IndexSpec, TideError};
///
/// pub struct CreateControlIndexes;
///
/// impl Migration for CreateControlIndexes {
///     fn version(&self) -> i64 {
///         1
///     }
///
///     fn description(&self) -> &str {
///         "create control indexes"
///     }
///
///     fn apply(&self, _ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
///         manager.create_index(
///             "controls",
///             IndexSpec::new("controls_org_code", doc! { "organization_id": 1, "code": 1 }).unique(),
///         )
///     }
///
///     fn revert(&self, _ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
///         manager.drop_index("controls", "controls_org_code")
///     }
/// }
/// ```
pub trait Migration: Send + Sync {
    /// Migration version; positive and unique within a registry
    fn version(&self) -> i64;

    /// Human-readable description, stable once published
    fn description(&self) -> &str;

    /// Apply the migration (forward migration)
    fn apply(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError>;

    /// Revert the migration (reverse migration)
    fn revert(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError>;
}

type Operation =
    Box<dyn Fn(&MigrationContext, &SchemaManager<'_>) -> Result<(), TideError> + Send + Sync>;

/// A migration assembled from two closures
///
/// Handy for small index migrations and for tests; larger migrations usually get
/// their own struct implementing [`Migration`].
pub struct MigrationDefinition {
    version: i64,
    description: String,
    apply: Operation,
    revert: Operation,
}

impl MigrationDefinition {
    pub fn new<A, R>(version: i64, description: impl Into<String>, apply: A, revert: R) -> Self
    where
        A: Fn(&MigrationContext, &SchemaManager<'_>) -> Result<(), TideError> + Send + Sync + 'static,
        R: Fn(&MigrationContext, &SchemaManager<'_>) -> Result<(), TideError> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.into(),
            apply: Box::new(apply),
            revert: Box::new(revert),
        }
    }
}

impl std::fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Migration for MigrationDefinition {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        (self.apply)(ctx, manager)
    }

    fn revert(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        (self.revert)(ctx, manager)
    }
}
