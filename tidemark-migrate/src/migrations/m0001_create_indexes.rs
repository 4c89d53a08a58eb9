use mongodb::bson::doc;
use tidemark::migration::{Migration, MigrationContext, SchemaManager};
use tidemark::{IndexSpec, TideError};

/// Lookup indexes for the core collections
pub struct CreateIndexes;

fn indexes() -> Vec<(&'static str, IndexSpec)> {
    vec![
        (
            "users",
            IndexSpec::new("users_email_unique", doc! { "email": 1 }).unique(),
        ),
        (
            "controls",
            IndexSpec::new("controls_org_code_unique", doc! { "organization_id": 1, "code": 1 }).unique(),
        ),
        (
            "evidence",
            IndexSpec::new("evidence_control_id", doc! { "control_id": 1 }),
        ),
        (
            "evidence",
            IndexSpec::new("evidence_org_created_at", doc! { "organization_id": 1, "created_at": -1 }),
        ),
    ]
}

impl Migration for CreateIndexes {
    fn version(&self) -> i64 {
        1
    }

    fn description(&self) -> &str {
        "create indexes"
    }

    fn apply(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        for (collection, index) in indexes() {
            ctx.check()?;
            // Index builds on large collections can outlast the lease
            manager.renew_lease()?;
            manager.create_index(collection, index)?;
        }
        Ok(())
    }

    fn revert(&self, _ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        for (collection, index) in indexes().into_iter().rev() {
            manager.drop_index_if_exists(collection, &index.name)?;
        }
        Ok(())
    }
}
