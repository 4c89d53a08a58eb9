//! `MigrationRecord` - Represents entries in the `schema_migrations` collection

use crate::migration::checksum::calculate_checksum;
use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// Represents one applied migration in the record store
///
/// Records are written once when `apply` succeeds and deleted once when `revert`
/// succeeds. They are never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version
    pub version: i64,

    /// Description as it read when the migration was applied
    pub description: String,

    /// When `apply` completed
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub applied_at: DateTime<Utc>,

    /// `SHA-256` fingerprint of version and description
    pub checksum: String,

    /// Execution time in milliseconds (`None` if not recorded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
}

impl MigrationRecord {
    /// Create a `MigrationRecord`
    #[must_use]
    pub fn new(
        version: i64,
        description: String,
        checksum: String,
        applied_at: DateTime<Utc>,
        execution_time_ms: Option<i64>,
    ) -> Self {
        Self {
            version,
            description,
            applied_at,
            checksum,
            execution_time_ms,
        }
    }

    /// Record a successful apply that finished now, fingerprinting the definition
    #[must_use]
    pub fn applied_now(version: i64, description: &str, execution_time_ms: Option<i64>) -> Self {
        Self::new(
            version,
            description.to_string(),
            calculate_checksum(version, description),
            Utc::now(),
            execution_time_ms,
        )
    }
}
