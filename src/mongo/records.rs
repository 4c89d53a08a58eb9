use crate::migration::{MigrationError, MigrationRecord, RecordStore};
use super::{create_records_collection, MongoExecutor};
use crate::TideError;
use mongodb::bson::doc;
use mongodb::options::{FindOneOptions, FindOptions};
use mongodb::sync::{Collection, Database};

/// `RecordStore` over the `schema_migrations` collection
///
/// One document per applied version. A unique index on `version` (see
/// `initialize_records`, run by the migrator before its first write) turns a
/// concurrent double-apply into `DuplicateVersion`.
#[derive(Clone, Debug)]
pub struct MongoRecordStore {
    collection: Collection<MigrationRecord>,
    executor: MongoExecutor,
}

impl MongoRecordStore {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
            executor: MongoExecutor::new(database.clone()),
        }
    }
}

impl RecordStore for MongoRecordStore {
    fn current_version(&self) -> Result<i64, MigrationError> {
        let options = FindOneOptions::builder().sort(doc! { "version": -1 }).build();
        let latest = self
            .collection
            .find_one(None, options)
            .map_err(TideError::from)?;
        Ok(latest.map_or(0, |record| record.version))
    }

    fn append(&self, record: &MigrationRecord) -> Result<(), MigrationError> {
        match self.collection.insert_one(record, None).map_err(TideError::from) {
            Ok(_) => Ok(()),
            Err(TideError::DuplicateKey(_)) => Err(MigrationError::DuplicateVersion {
                version: record.version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, version: i64) -> Result<(), MigrationError> {
        let result = self
            .collection
            .delete_one(doc! { "version": version }, None)
            .map_err(TideError::from)?;
        if result.deleted_count == 0 {
            return Err(MigrationError::NotFound { version });
        }
        Ok(())
    }

    fn history(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let options = FindOptions::builder().sort(doc! { "version": 1 }).build();
        let cursor = self.collection.find(None, options).map_err(TideError::from)?;
        let records = cursor
            .collect::<Result<Vec<_>, _>>()
            .map_err(TideError::from)?;
        Ok(records)
    }

    fn initialize_records(&self) -> Result<(), MigrationError> {
        Ok(create_records_collection(&self.executor, self.collection.name())?)
    }
}
