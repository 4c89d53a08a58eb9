use super::{create_locks_collection, MongoExecutor};
use crate::migration::lock::expires_after;
use crate::migration::{LockCoordinator, LockHandle, LockInfo, MigrationContext, MigrationError};
use crate::TideError;
use chrono::Utc;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::sync::{Collection, Database};
use std::time::Duration;

/// `LockCoordinator` over the `migration_locks` collection
///
/// One document per lock name, keyed by `_id`. Acquisition is a single conditional
/// upsert: it matches only an expired document, so when a live lock exists the
/// upsert collides on `_id` and the server reports a duplicate key.
#[derive(Clone, Debug)]
pub struct MongoLockCoordinator {
    collection: Collection<LockInfo>,
    executor: MongoExecutor,
}

impl MongoLockCoordinator {
    pub fn new(database: &Database, collection: &str) -> Self {
        Self {
            collection: database.collection(collection),
            executor: MongoExecutor::new(database.clone()),
        }
    }

    fn busy(&self, name: &str) -> Result<MigrationError, MigrationError> {
        let existing = self.current(name)?;
        Ok(match existing {
            Some(info) => MigrationError::LockBusy {
                name: info.name,
                holder: info.holder,
                expires_at: info.expires_at,
            },
            // Released between our upsert and the read; report it as busy and let the caller retry
            None => MigrationError::LockBusy {
                name: name.to_string(),
                holder: String::new(),
                expires_at: Utc::now(),
            },
        })
    }
}

impl LockCoordinator for MongoLockCoordinator {
    fn acquire(
        &self,
        ctx: &MigrationContext,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockHandle, MigrationError> {
        ctx.check()?;

        let now = Utc::now();
        let filter = doc! {
            "_id": name,
            "expires_at": { "$lt": BsonDateTime::from_chrono(now) },
        };
        let update = doc! {
            "$set": {
                "holder": holder,
                "acquired_at": BsonDateTime::from_chrono(now),
                "expires_at": BsonDateTime::from_chrono(expires_after(now, ttl)),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        match self
            .collection
            .find_one_and_update(filter, update, options)
            .map_err(TideError::from)
        {
            Ok(Some(info)) => Ok(info.into()),
            Ok(None) => Err(MigrationError::Database(TideError::Other(format!(
                "lock '{name}' upsert returned no document"
            )))),
            Err(TideError::DuplicateKey(_)) => Err(self.busy(name)?),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, handle: &LockHandle) -> Result<bool, MigrationError> {
        let result = self
            .collection
            .delete_one(doc! { "_id": handle.name.as_str(), "holder": handle.holder.as_str() }, None)
            .map_err(TideError::from)?;
        Ok(result.deleted_count == 1)
    }

    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, MigrationError> {
        let update = doc! {
            "$set": { "expires_at": BsonDateTime::from_chrono(expires_after(Utc::now(), ttl)) }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection
            .find_one_and_update(doc! { "_id": handle.name.as_str(), "holder": handle.holder.as_str() }, update, options)
            .map_err(TideError::from)?
            .map(LockHandle::from)
            .ok_or_else(|| MigrationError::LockLost {
                name: handle.name.clone(),
                holder: handle.holder.clone(),
            })
    }

    fn current(&self, name: &str) -> Result<Option<LockInfo>, MigrationError> {
        Ok(self
            .collection
            .find_one(doc! { "_id": name }, None)
            .map_err(TideError::from)?)
    }

    fn initialize_locks(&self) -> Result<(), MigrationError> {
        Ok(create_locks_collection(&self.executor, self.collection.name())?)
    }
}
