use mongodb::bson::doc;
use tidemark::migration::{Migration, MigrationContext, SchemaManager};
use tidemark::{IndexSpec, TideError};

const AUDIT_LOGS: &str = "audit_logs";

/// Query paths of the audit trail: per organization by time, per actor, per resource
pub struct AddAuditIndexes;

fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new("audit_logs_org_created_at", doc! { "organization_id": 1, "created_at": -1 }),
        IndexSpec::new("audit_logs_actor_id", doc! { "actor_id": 1 }).sparse(),
        IndexSpec::new(
            "audit_logs_resource",
            doc! { "resource_type": 1, "resource_id": 1, "created_at": -1 },
        ),
    ]
}

impl Migration for AddAuditIndexes {
    fn version(&self) -> i64 {
        2
    }

    fn description(&self) -> &str {
        "add audit indexes"
    }

    fn apply(&self, ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        ctx.check()?;
        manager.create_collection(AUDIT_LOGS)?;
        manager.create_indexes(AUDIT_LOGS, indexes())
    }

    fn revert(&self, _ctx: &MigrationContext, manager: &SchemaManager<'_>) -> Result<(), TideError> {
        for index in indexes() {
            manager.drop_index_if_exists(AUDIT_LOGS, &index.name)?;
        }
        Ok(())
    }
}
