//! In-memory backend
//!
//! `MemoryDatabase` implements every capability the migrator needs: the schema
//! executor, the record store and the lock coordinator. It keeps collections and
//! index definitions but no documents; commands, updates and state initialization are journaled so tests
//! can assert on what a migration did. Clones share state, which lets one process
//! stand in for several competing ones.

use crate::migration::lock::expires_after;
use crate::migration::{
    LockCoordinator, LockHandle, LockInfo, MigrationContext, MigrationError, MigrationRecord,
    RecordStore,
};
use crate::{DocumentExecutor, IndexSpec, TideError};
use chrono::Utc;
use mongodb::bson::{doc, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<String, IndexSpec>>,
    journal: Vec<String>,
    records: BTreeMap<i64, MigrationRecord>,
    locks: HashMap<String, LockInfo>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, TideError> {
        self.state
            .lock()
            .map_err(|e| TideError::Other(format!("Failed to lock in-memory database: {e}")))
    }

    /// Names of existing collections, sorted
    pub fn collection_names(&self) -> Result<Vec<String>, TideError> {
        Ok(self.state()?.collections.keys().cloned().collect())
    }

    /// Full index definition, if present
    pub fn index(&self, collection: &str, name: &str) -> Result<Option<IndexSpec>, TideError> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .and_then(|indexes| indexes.get(name))
            .cloned())
    }

    /// Commands and updates executed so far, oldest first
    pub fn journal(&self) -> Result<Vec<String>, TideError> {
        Ok(self.state()?.journal.clone())
    }

    /// Overwrite a lock document, e.g. to simulate a crashed holder
    pub fn put_lock(&self, info: LockInfo) -> Result<(), TideError> {
        self.state()?.locks.insert(info.name.clone(), info);
        Ok(())
    }
}

impl DocumentExecutor for MemoryDatabase {
    fn run_command(&self, command: Document) -> Result<Document, TideError> {
        self.state()?.journal.push(format!("command {command}"));
        Ok(doc! { "ok": 1 })
    }

    fn create_collection(&self, name: &str) -> Result<(), TideError> {
        self.state()?.collections.entry(name.to_string()).or_default();
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<(), TideError> {
        self.state()?.collections.remove(name);
        Ok(())
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), TideError> {
        let mut state = self.state()?;
        let indexes = state.collections.entry(collection.to_string()).or_default();
        match indexes.get(&index.name) {
            Some(existing) if existing != index => Err(TideError::Other(format!(
                "Index '{}' already exists on '{}' with different options",
                index.name, collection
            ))),
            Some(_) => Ok(()),
            None => {
                indexes.insert(index.name.clone(), index.clone());
                Ok(())
            }
        }
    }

    fn drop_index(&self, collection: &str, name: &str) -> Result<(), TideError> {
        self.state()?
            .collections
            .get_mut(collection)
            .and_then(|indexes| indexes.remove(name))
            .map(|_| ())
            .ok_or_else(|| TideError::NotFound(format!("index '{name}' on '{collection}'")))
    }

    fn list_index_names(&self, collection: &str) -> Result<Vec<String>, TideError> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .map(|indexes| indexes.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn update_many(&self, collection: &str, filter: Document, update: Document) -> Result<u64, TideError> {
        let mut state = self.state()?;
        state.collections.entry(collection.to_string()).or_default();
        state
            .journal
            .push(format!("update_many {collection} {filter} {update}"));
        Ok(0)
    }
}

impl RecordStore for MemoryDatabase {
    fn current_version(&self) -> Result<i64, MigrationError> {
        Ok(self
            .state()?
            .records
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    fn append(&self, record: &MigrationRecord) -> Result<(), MigrationError> {
        let mut state = self.state()?;
        if state.records.contains_key(&record.version) {
            return Err(MigrationError::DuplicateVersion {
                version: record.version,
            });
        }
        state.records.insert(record.version, record.clone());
        Ok(())
    }

    fn remove(&self, version: i64) -> Result<(), MigrationError> {
        self.state()?
            .records
            .remove(&version)
            .map(|_| ())
            .ok_or(MigrationError::NotFound { version })
    }

    fn history(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        Ok(self.state()?.records.values().cloned().collect())
    }

    fn initialize_records(&self) -> Result<(), MigrationError> {
        self.state()?.journal.push("initialize records".to_string());
        Ok(())
    }
}

impl LockCoordinator for MemoryDatabase {
    fn acquire(
        &self,
        ctx: &MigrationContext,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockHandle, MigrationError> {
        ctx.check()?;

        let mut state = self.state()?;
        if let Some(existing) = state.locks.get(name) {
            if !existing.is_expired_at(Utc::now()) {
                return Err(MigrationError::LockBusy {
                    name: name.to_string(),
                    holder: existing.holder.clone(),
                    expires_at: existing.expires_at,
                });
            }
        }

        let info = LockInfo::new(name, holder, ttl);
        state.locks.insert(name.to_string(), info.clone());
        Ok(info.into())
    }

    fn release(&self, handle: &LockHandle) -> Result<bool, MigrationError> {
        let mut state = self.state()?;
        match state.locks.get(&handle.name) {
            Some(existing) if existing.holder == handle.holder => {
                state.locks.remove(&handle.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, MigrationError> {
        let mut state = self.state()?;
        match state.locks.get_mut(&handle.name) {
            Some(existing) if existing.holder == handle.holder => {
                existing.expires_at = expires_after(Utc::now(), ttl);
                Ok(existing.clone().into())
            }
            _ => Err(MigrationError::LockLost {
                name: handle.name.clone(),
                holder: handle.holder.clone(),
            }),
        }
    }

    fn current(&self, name: &str) -> Result<Option<LockInfo>, MigrationError> {
        Ok(self.state()?.locks.get(name).cloned())
    }

    fn initialize_locks(&self) -> Result<(), MigrationError> {
        self.state()?.journal.push("initialize locks".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_record_store_contract() {
        let db = MemoryDatabase::new();
        assert_eq!(db.current_version().expect("read"), 0);

        db.append(&MigrationRecord::applied_now(1, "create indexes", None))
            .expect("append v1");
        db.append(&MigrationRecord::applied_now(2, "add audit indexes", None))
            .expect("append v2");
        assert_eq!(db.current_version().expect("read"), 2);

        assert!(matches!(
            db.append(&MigrationRecord::applied_now(2, "add audit indexes", None)),
            Err(MigrationError::DuplicateVersion { version: 2 })
        ));

        let history: Vec<i64> = db.history().expect("history").iter().map(|r| r.version).collect();
        assert_eq!(history, vec![1, 2]);

        db.remove(2).expect("remove v2");
        assert_eq!(db.current_version().expect("read"), 1);
        assert!(matches!(db.remove(2), Err(MigrationError::NotFound { version: 2 })));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_lock_is_exclusive_until_released() {
        let db = MemoryDatabase::new();
        let ctx = MigrationContext::background();
        let ttl = Duration::from_secs(60);

        let first = db.acquire(&ctx, "migration_lock", "a", ttl).expect("free lock");
        match db.acquire(&ctx, "migration_lock", "b", ttl) {
            Err(MigrationError::LockBusy { holder, .. }) => assert_eq!(holder, "a"),
            other => panic!("Expected LockBusy, got {other:?}"),
        }
        // Same holder is not reentrant either
        assert!(db.acquire(&ctx, "migration_lock", "a", ttl).is_err());
        // Other lock names are independent
        db.acquire(&ctx, "other_lock", "b", ttl).expect("independent name");

        assert!(db.release(&first).expect("release"));
        db.acquire(&ctx, "migration_lock", "b", ttl).expect("lock is free again");
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_expired_lock_can_be_taken_over_and_stale_release_is_ignored() {
        let db = MemoryDatabase::new();
        let ctx = MigrationContext::background();

        let stale = db
            .acquire(&ctx, "migration_lock", "crashed", Duration::from_millis(10))
            .expect("free lock");
        std::thread::sleep(Duration::from_millis(30));

        let fresh = db
            .acquire(&ctx, "migration_lock", "replacement", Duration::from_secs(60))
            .expect("expired lock can be taken over");

        // The slow first holder must not delete the replacement's lock
        assert!(!db.release(&stale).expect("release"));
        assert!(matches!(
            db.extend(&stale, Duration::from_secs(60)),
            Err(MigrationError::LockLost { .. })
        ));
        let current = db.current("migration_lock").expect("read").expect("lock present");
        assert_eq!(current.holder, "replacement");

        assert!(db.release(&fresh).expect("release"));
    }

    #[test]
    fn test_acquire_respects_cancelled_context() {
        let db = MemoryDatabase::new();
        let ctx = MigrationContext::background();
        ctx.cancel();
        assert!(matches!(
            db.acquire(&ctx, "migration_lock", "a", Duration::from_secs(60)),
            Err(MigrationError::Cancelled { version: None, .. })
        ));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_ensure_index_is_idempotent_per_name() {
        let db = MemoryDatabase::new();
        let spec = IndexSpec::new("controls_code", doc! { "code": 1 }).unique();
        db.ensure_index("controls", &spec).expect("create");
        db.ensure_index("controls", &spec).expect("same definition again");

        let conflicting = IndexSpec::new("controls_code", doc! { "code": -1 });
        assert!(db.ensure_index("controls", &conflicting).is_err());
        assert_eq!(db.collection_names().expect("names"), vec!["controls".to_string()]);
    }
}
