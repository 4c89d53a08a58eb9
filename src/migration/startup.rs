//! In-process migration execution helpers

use crate::migration::{MigrationContext, MigrationError, Migrator};
use std::time::{Duration, Instant};

/// How often a waiting replica retries the lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run migrations on application startup
///
/// This function is designed to be called during application initialization
/// to bring the database up to date before serving traffic.
///
/// # Behavior
///
/// - **First process wins:** the first replica to start takes the lock and applies
///   pending migrations
/// - **Other processes wait:** a replica that finds the lock held retries for up to
///   `wait`, then runs `up` itself, which is a no-op once the winner has finished
/// - **Fail-fast:** any other error is returned immediately and the application
///   should not start
///
/// Returns the current version after migrating.
///
/// # Errors
///
/// Returns `MigrationInProgress` if the lock is still held after `wait`, or the
/// first non-transient error from [`Migrator::up`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tidemark::memory::MemoryDatabase;
/// use tidemark::migration::{startup_migrations, MigrationContext, MigrationRegistry, Migrator};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = Arc::new(MigrationRegistry::new(Vec::new())?);
///     let migrator = Migrator::with_backend(registry, Arc::new(MemoryDatabase::new()));
///
///     let ctx = MigrationContext::with_timeout(Duration::from_secs(300));
///     startup_migrations(&migrator, &ctx, Duration::from_secs(60))?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    migrator: &Migrator,
    ctx: &MigrationContext,
    wait: Duration,
) -> Result<i64, MigrationError> {
    let started = Instant::now();
    let before = migrator.version()?;

    loop {
        match migrator.up(ctx) {
            Ok(version) => {
                if version > before {
                    log::info!("Applied {} migration(s) on startup, now at version {}", version - before, version);
                } else {
                    log::debug!("No pending migrations to apply (version {})", version);
                }
                return Ok(version);
            }
            Err(MigrationError::MigrationInProgress { lock, holder })
                if started.elapsed() < wait =>
            {
                if let Some(reason) = ctx.reason() {
                    return Err(reason.into());
                }
                log::info!(
                    target: "tidemark::lock",
                    lock = lock.as_str(), holder = holder.as_str();
                    "waiting for '{holder}' to finish migrating"
                );
                let pause = ctx
                    .remaining()
                    .map_or(LOCK_POLL_INTERVAL, |left| left.min(LOCK_POLL_INTERVAL));
                std::thread::sleep(pause);
            }
            Err(e) => return Err(e),
        }
    }
}
