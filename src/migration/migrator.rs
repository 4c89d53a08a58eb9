//! Migrator - Core migration execution engine

use crate::migration::checksum::{calculate_checksum, validate_checksum};
use crate::migration::lock::DEFAULT_LOCK_NAME;
use crate::migration::{
    LockCoordinator, Migration, MigrationContext, MigrationError, MigrationLockGuard,
    MigrationRecord, MigrationRegistry, MigrationStatus, PendingMigration, RecordStore,
    SchemaManager,
};
use crate::DocumentExecutor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Log target for the structured progress events
/// (`migration_started`, `migration_applied`, `migration_failed`, `migration_reverted`)
pub const EVENT_TARGET: &str = "tidemark::events";

/// Default lease on the migration lock; extended before every step
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// Shortest lease `up`/`down` accept
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(1);

/// Runtime options for a [`Migrator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Name of the lock record shared by competing processes
    pub lock_name: String,
    /// Identity written into the lock; unique per process
    pub holder_id: String,
    pub lock_ttl: Duration,
    /// Check the applied history for gaps and checksum drift before migrating
    pub verify_history: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            holder_id: default_holder_id(),
            lock_ttl: DEFAULT_LOCK_TTL,
            verify_history: true,
        }
    }
}

impl MigratorConfig {
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidLockTtl` when `lock_ttl` is below [`MIN_LOCK_TTL`].
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.lock_ttl < MIN_LOCK_TTL {
            return Err(MigrationError::InvalidLockTtl {
                ttl: self.lock_ttl,
                min: MIN_LOCK_TTL,
            });
        }
        Ok(())
    }
}

/// `{pid}-{uuid}`: distinct across replicas and across restarts of one replica
pub fn default_holder_id() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Core migration execution engine
///
/// The `Migrator` orchestrates lock acquisition, pending-set selection, execution
/// and record keeping. `up` applies every pending migration in ascending order;
/// `down` reverts exactly one, the most recent. Both hold the migration lock for
/// the whole run and release it on every exit path.
///
/// A `Migrator` is not reentrant: do not call `up`/`down` concurrently on the
/// same instance.
pub struct Migrator {
    registry: Arc<MigrationRegistry>,
    executor: Arc<dyn DocumentExecutor>,
    store: Arc<dyn RecordStore>,
    locks: Arc<dyn LockCoordinator>,
    config: MigratorConfig,
    initialized: AtomicBool,
}

impl Migrator {
    /// Create a Migrator over explicit collaborators with the default config
    pub fn new(
        registry: Arc<MigrationRegistry>,
        executor: Arc<dyn DocumentExecutor>,
        store: Arc<dyn RecordStore>,
        locks: Arc<dyn LockCoordinator>,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            locks,
            config: MigratorConfig::default(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a Migrator whose executor, record store and lock coordinator are one backend
    pub fn with_backend<B>(registry: Arc<MigrationRegistry>, backend: Arc<B>) -> Self
    where
        B: DocumentExecutor + RecordStore + LockCoordinator + 'static,
    {
        Self::new(registry, backend.clone(), backend.clone(), backend)
    }

    #[must_use]
    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Highest applied version, read without taking the lock
    pub fn version(&self) -> Result<i64, MigrationError> {
        self.store.current_version()
    }

    /// Applied records, ascending by version
    pub fn history(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.store.history()
    }

    /// Get migration status (applied vs pending)
    ///
    /// Read-only; does not take the lock and does not validate checksums.
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let applied = self.store.history()?;
        let current = applied.last().map_or(0, |r| r.version);

        let pending = self
            .registry
            .since(current)
            .map(|m| PendingMigration {
                version: m.version(),
                description: m.description().to_string(),
                checksum: calculate_checksum(m.version(), m.description()),
            })
            .collect();

        Ok(MigrationStatus::new(applied, pending))
    }

    /// Validate the applied history against the registry
    ///
    /// Fails on a record for a version this build does not know, on a registered
    /// version missing below the current one, and on checksum drift.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let history = self.store.history()?;
        self.verify_history(&history, true)
    }

    /// Apply all pending migrations
    ///
    /// Returns the new current version. With nothing pending this still takes and
    /// releases the lock and returns the unchanged version.
    ///
    /// # Errors
    ///
    /// - `MigrationInProgress` if another process holds the lock
    /// - `MigrationFailed` for the first migration whose `apply` fails; earlier
    ///   migrations of this run stay applied and recorded
    /// - `Cancelled` if `ctx` ended before a step could start
    /// - `HistoryGap` / `ChecksumMismatch` when history verification is enabled
    /// - `InvalidLockTtl` if the configured lease is below [`MIN_LOCK_TTL`]
    pub fn up(&self, ctx: &MigrationContext) -> Result<i64, MigrationError> {
        self.prepare()?;
        let guard = self.lock(ctx)?;
        let result = self.up_locked(ctx, &guard);
        self.finish(guard, result)
    }

    /// Revert the most recently applied migration
    ///
    /// Returns the new current version.
    ///
    /// # Errors
    ///
    /// - `NoMigrationsApplied` if the current version is 0
    /// - `UnknownVersion` if this build does not define the applied version
    /// - `MigrationInProgress`, `MigrationFailed`, `Cancelled` as for [`up`](Self::up)
    pub fn down(&self, ctx: &MigrationContext) -> Result<i64, MigrationError> {
        self.prepare()?;
        let guard = self.lock(ctx)?;
        let result = self.down_locked(ctx, &guard);
        self.finish(guard, result)
    }

    /// Validate the config and create the state collections on first use
    ///
    /// Read-only operations never get here, so `status`/`history`/`version` work
    /// with read-only credentials.
    fn prepare(&self) -> Result<(), MigrationError> {
        self.config.validate()?;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.store.initialize_records()?;
        self.locks.initialize_locks()?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn lock(&self, ctx: &MigrationContext) -> Result<MigrationLockGuard<'_>, MigrationError> {
        MigrationLockGuard::acquire(
            self.locks.as_ref(),
            ctx,
            &self.config.lock_name,
            &self.config.holder_id,
            self.config.lock_ttl,
        )
        .map_err(|e| match e {
            MigrationError::LockBusy { name, holder, .. } => {
                log::warn!(
                    target: EVENT_TARGET,
                    event = "migration_in_progress", lock = name.as_str(), holder = holder.as_str();
                    "migrations are already running under lock '{name}' (holder {holder})"
                );
                MigrationError::MigrationInProgress { lock: name, holder }
            }
            other => other,
        })
    }

    /// Release the lock and hand back the run's result; a release failure is only logged
    fn finish<T>(
        &self,
        guard: MigrationLockGuard<'_>,
        result: Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        match guard.release() {
            Ok(true) => log::debug!(target: "tidemark::lock", "released lock '{}'", self.config.lock_name),
            Ok(false) => log::warn!(
                target: "tidemark::lock",
                "lock '{}' was no longer held by '{}' at release",
                self.config.lock_name, self.config.holder_id
            ),
            Err(e) => log::error!(
                target: "tidemark::lock",
                "failed to release lock '{}': {}", self.config.lock_name, e
            ),
        }
        result
    }

    fn up_locked(
        &self,
        ctx: &MigrationContext,
        guard: &MigrationLockGuard<'_>,
    ) -> Result<i64, MigrationError> {
        let current = self.store.current_version()?;
        if self.config.verify_history {
            self.verify_history(&self.store.history()?, false)?;
        }

        if current > self.registry.latest_version() {
            log::warn!(
                target: EVENT_TARGET,
                "database is at version {current}, ahead of the latest known version {}",
                self.registry.latest_version()
            );
        }

        let manager = SchemaManager::with_lease(self.executor.as_ref(), guard);
        let mut version = current;

        for migration in self.registry.since(current) {
            if let Some(reason) = ctx.reason() {
                return Err(MigrationError::Cancelled {
                    reason,
                    version: Some(migration.version()),
                });
            }
            guard.extend()?;
            self.apply_one(ctx, migration, &manager)?;
            version = migration.version();
        }

        Ok(version)
    }

    fn down_locked(
        &self,
        ctx: &MigrationContext,
        guard: &MigrationLockGuard<'_>,
    ) -> Result<i64, MigrationError> {
        let current = self.store.current_version()?;
        if current == 0 {
            return Err(MigrationError::NoMigrationsApplied);
        }
        if self.config.verify_history {
            self.verify_history(&self.store.history()?, false)?;
        }

        let migration = self
            .registry
            .get(current)
            .ok_or(MigrationError::UnknownVersion { version: current })?;

        if let Some(reason) = ctx.reason() {
            return Err(MigrationError::Cancelled {
                reason,
                version: Some(current),
            });
        }
        guard.extend()?;

        let manager = SchemaManager::with_lease(self.executor.as_ref(), guard);
        self.revert_one(ctx, migration, &manager)?;

        self.store.current_version()
    }

    fn apply_one(
        &self,
        ctx: &MigrationContext,
        migration: &dyn Migration,
        manager: &SchemaManager<'_>,
    ) -> Result<(), MigrationError> {
        let version = migration.version();
        let description = migration.description();

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration.apply", version, description).entered();

        log::info!(
            target: EVENT_TARGET,
            event = "migration_started", version = version;
            "applying migration {version}: {description}"
        );

        let start = Instant::now();
        if let Err(cause) = migration.apply(ctx, manager) {
            let error = cause.to_string();
            log::error!(
                target: EVENT_TARGET,
                event = "migration_failed", version = version, error = error.as_str();
                "migration {version} ({description}) failed: {error}"
            );
            return Err(MigrationError::MigrationFailed {
                version,
                description: description.to_string(),
                cause,
            });
        }

        let elapsed_ms = i64::try_from(start.elapsed().as_millis()).ok();
        self.store
            .append(&MigrationRecord::applied_now(version, description, elapsed_ms))?;

        log::info!(
            target: EVENT_TARGET,
            event = "migration_applied", version = version, elapsed_ms = elapsed_ms.unwrap_or(-1);
            "applied migration {version}: {description}"
        );
        Ok(())
    }

    fn revert_one(
        &self,
        ctx: &MigrationContext,
        migration: &dyn Migration,
        manager: &SchemaManager<'_>,
    ) -> Result<(), MigrationError> {
        let version = migration.version();
        let description = migration.description();

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration.revert", version, description).entered();

        log::info!(
            target: EVENT_TARGET,
            event = "migration_revert_started", version = version;
            "reverting migration {version}: {description}"
        );

        if let Err(cause) = migration.revert(ctx, manager) {
            let error = cause.to_string();
            log::error!(
                target: EVENT_TARGET,
                event = "migration_failed", version = version, error = error.as_str();
                "revert of migration {version} ({description}) failed: {error}"
            );
            return Err(MigrationError::MigrationFailed {
                version,
                description: description.to_string(),
                cause,
            });
        }

        self.store.remove(version)?;

        log::info!(
            target: EVENT_TARGET,
            event = "migration_reverted", version = version;
            "reverted migration {version}: {description}"
        );
        Ok(())
    }

    /// Check that the applied history is a consistent prefix of the registry
    ///
    /// With `strict`, records newer than anything this build knows are an error;
    /// otherwise they are tolerated so an older replica can run `up` as a no-op.
    fn verify_history(&self, history: &[MigrationRecord], strict: bool) -> Result<(), MigrationError> {
        let current = history.iter().map(|r| r.version).max().unwrap_or(0);
        let latest = self.registry.latest_version();

        for record in history {
            match self.registry.get(record.version) {
                Some(migration) => {
                    validate_checksum(record.version, migration.description(), &record.checksum)?;
                }
                None if self.registry.is_retired(record.version) => {}
                None if !strict && record.version > latest => {}
                None => {
                    return Err(MigrationError::UnknownVersion {
                        version: record.version,
                    })
                }
            }
        }

        for migration in self.registry.up_to(current) {
            let version = migration.version();
            if history.binary_search_by_key(&version, |r| r.version).is_err() {
                return Err(MigrationError::HistoryGap {
                    missing: version,
                    current,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use crate::migration::MigrationDefinition;
    use crate::TideError;

    fn registry(versions: &[(i64, &str)]) -> Arc<MigrationRegistry> {
        let migrations: Vec<Box<dyn Migration>> = versions
            .iter()
            .map(|&(version, description)| {
                Box::new(MigrationDefinition::new(
                    version,
                    description,
                    |_, _| Ok(()),
                    |_, _| Ok(()),
                )) as Box<dyn Migration>
            })
            .collect();
        #[allow(clippy::expect_used)] // Test code - expect is acceptable
        Arc::new(MigrationRegistry::new(migrations).expect("valid registry"))
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_status_reports_pending() {
        let db = Arc::new(MemoryDatabase::new());
        let migrator = Migrator::with_backend(
            registry(&[(1, "create indexes"), (2, "add audit indexes")]),
            db.clone(),
        );

        let status = migrator.status().expect("status");
        assert_eq!(status.pending_count, 2);
        assert_eq!(status.next_pending_version(), Some(1));

        migrator.up(&MigrationContext::background()).expect("up");
        let status = migrator.status().expect("status");
        assert!(status.is_up_to_date());
        assert_eq!(status.latest_applied_version(), Some(2));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_validate_detects_checksum_drift() {
        let db = Arc::new(MemoryDatabase::new());
        db.append(&MigrationRecord::applied_now(1, "create index", None))
            .expect("seed record");

        let migrator = Migrator::with_backend(registry(&[(1, "create indexes")]), db);
        assert!(matches!(
            migrator.validate(),
            Err(MigrationError::ChecksumMismatch { version: 1, .. })
        ));
        // `up` refuses to build on drifted history
        assert!(matches!(
            migrator.up(&MigrationContext::background()),
            Err(MigrationError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_validate_detects_gap_and_unknown_versions() {
        let db = Arc::new(MemoryDatabase::new());
        db.append(&MigrationRecord::applied_now(2, "b", None)).expect("seed");
        let migrator = Migrator::with_backend(registry(&[(1, "a"), (2, "b")]), db.clone());
        assert!(matches!(
            migrator.validate(),
            Err(MigrationError::HistoryGap { missing: 1, current: 2 })
        ));

        let db = Arc::new(MemoryDatabase::new());
        db.append(&MigrationRecord::applied_now(1, "a", None)).expect("seed");
        db.append(&MigrationRecord::applied_now(2, "from a newer build", None))
            .expect("seed");
        let migrator = Migrator::with_backend(registry(&[(1, "a")]), db);
        assert!(matches!(
            migrator.validate(),
            Err(MigrationError::UnknownVersion { version: 2 })
        ));
        // An older build tolerates a database that is ahead of it
        assert_eq!(migrator.up(&MigrationContext::background()).expect("up is a no-op"), 2);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_retired_version_without_record_is_consistent() {
        let db = Arc::new(MemoryDatabase::new());
        let registry = MigrationRegistry::builder()
            .register(MigrationDefinition::new(1, "a", |_, _| Ok(()), |_, _| Ok(())))
            .register(MigrationDefinition::new(3, "c", |_, _| Ok(()), |_, _| Ok(())))
            .retire(2)
            .build()
            .expect("valid registry");
        let migrator = Migrator::with_backend(Arc::new(registry), db);

        assert_eq!(migrator.up(&MigrationContext::background()).expect("up"), 3);
        migrator.validate().expect("retired gap is not a hole");
        assert_eq!(migrator.down(&MigrationContext::background()).expect("down"), 1);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_down_unknown_version() {
        let db = Arc::new(MemoryDatabase::new());
        db.append(&MigrationRecord::applied_now(1, "a", None)).expect("seed");
        db.append(&MigrationRecord::applied_now(2, "newer", None)).expect("seed");
        let migrator = Migrator::with_backend(registry(&[(1, "a")]), db.clone());

        assert!(matches!(
            migrator.down(&MigrationContext::background()),
            Err(MigrationError::UnknownVersion { version: 2 })
        ));
        assert!(db.current("migration_lock").expect("read lock").is_none());
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_revert_failure_keeps_record() {
        let db = Arc::new(MemoryDatabase::new());
        let registry = MigrationRegistry::new(vec![Box::new(MigrationDefinition::new(
            1,
            "a",
            |_, _| Ok(()),
            |_, _| Err(TideError::Other("cannot drop".to_string())),
        ))])
        .expect("valid registry");
        let migrator = Migrator::with_backend(Arc::new(registry), db.clone());
        let ctx = MigrationContext::background();

        migrator.up(&ctx).expect("up");
        match migrator.down(&ctx) {
            Err(MigrationError::MigrationFailed { version, .. }) => assert_eq!(version, 1),
            other => panic!("Expected MigrationFailed, got {other:?}"),
        }
        assert_eq!(migrator.version().expect("version"), 1);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_lock_ttl_below_minimum_is_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let migrator = Migrator::with_backend(registry(&[(1, "create indexes")]), db.clone()).with_config(
            MigratorConfig {
                lock_ttl: Duration::ZERO,
                ..MigratorConfig::default()
            },
        );
        let ctx = MigrationContext::background();

        assert!(matches!(
            migrator.up(&ctx),
            Err(MigrationError::InvalidLockTtl { ttl, min }) if ttl.is_zero() && min == MIN_LOCK_TTL
        ));
        assert!(matches!(migrator.down(&ctx), Err(MigrationError::InvalidLockTtl { .. })));
        assert_eq!(migrator.version().expect("version"), 0);
        assert!(db.current(DEFAULT_LOCK_NAME).expect("read lock").is_none());

        let config = MigratorConfig {
            lock_ttl: MIN_LOCK_TTL,
            ..MigratorConfig::default()
        };
        config.validate().expect("minimum is accepted");
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_long_step_renews_lease() {
        let db = MemoryDatabase::new();
        let observer = db.clone();
        let held = Arc::new(AtomicBool::new(false));
        let seen = held.clone();

        let registry = MigrationRegistry::new(vec![Box::new(MigrationDefinition::new(
            1,
            "long backfill",
            move |ctx, manager| {
                std::thread::sleep(Duration::from_millis(700));
                manager.renew_lease()?;
                std::thread::sleep(Duration::from_millis(700));
                // Past the original expiry; only the renewal keeps another holder out
                let busy = matches!(
                    observer.acquire(ctx, DEFAULT_LOCK_NAME, "replica-b", MIN_LOCK_TTL),
                    Err(MigrationError::LockBusy { .. })
                );
                seen.store(busy, Ordering::SeqCst);
                Ok(())
            },
            |_, _| Ok(()),
        ))])
        .expect("valid registry");
        let migrator = Migrator::with_backend(Arc::new(registry), Arc::new(db.clone())).with_config(
            MigratorConfig {
                holder_id: "replica-a".to_string(),
                lock_ttl: MIN_LOCK_TTL,
                ..MigratorConfig::default()
            },
        );

        assert_eq!(migrator.up(&MigrationContext::background()).expect("up"), 1);
        assert!(held.load(Ordering::SeqCst));
        assert!(db.current(DEFAULT_LOCK_NAME).expect("read lock").is_none());
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_state_is_initialized_only_for_writes() {
        let db = Arc::new(MemoryDatabase::new());
        let migrator = Migrator::with_backend(registry(&[(1, "a")]), db.clone());

        migrator.status().expect("status");
        migrator.history().expect("history");
        migrator.version().expect("version");
        migrator.validate().expect("validate");
        assert!(db.journal().expect("journal").is_empty());

        let ctx = MigrationContext::background();
        migrator.up(&ctx).expect("up");
        migrator.down(&ctx).expect("down");
        assert_eq!(
            db.journal().expect("journal"),
            vec!["initialize records".to_string(), "initialize locks".to_string()]
        );
    }

    #[test]
    fn test_default_config() {
        let config = MigratorConfig::default();
        assert_eq!(config.lock_name, DEFAULT_LOCK_NAME);
        assert_eq!(config.lock_ttl, DEFAULT_LOCK_TTL);
        assert!(config.verify_history);
        assert_ne!(config.holder_id, MigratorConfig::default().holder_id);
    }
}
