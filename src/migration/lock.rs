//! Lease-style migration lock with holder identity and expiry

use crate::migration::{MigrationContext, MigrationError};
use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default lock name shared by every process migrating the same database
pub const DEFAULT_LOCK_NAME: &str = "migration_lock";

/// The persisted lock document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(rename = "_id")]
    pub name: String,
    pub holder: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub acquired_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(name: &str, holder: &str, ttl: Duration) -> Self {
        let acquired_at = Utc::now();
        Self {
            name: name.to_string(),
            holder: holder.to_string(),
            acquired_at,
            expires_at: expires_after(acquired_at, ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// `at + ttl`, saturating instead of overflowing for absurd TTLs
pub(crate) fn expires_after(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Proof of a successful acquisition, needed to release or extend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<LockInfo> for LockHandle {
    fn from(info: LockInfo) -> Self {
        Self {
            name: info.name,
            holder: info.holder,
            acquired_at: info.acquired_at,
            expires_at: info.expires_at,
        }
    }
}

/// Mutual exclusion between processes migrating the same database
pub trait LockCoordinator: Send + Sync {
    /// Atomically take the named lock if it is free or expired
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockBusy` if another holder owns an unexpired lock,
    /// `MigrationError::Cancelled` if `ctx` is already done, or
    /// `MigrationError::Database`.
    fn acquire(
        &self,
        ctx: &MigrationContext,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LockHandle, MigrationError>;

    /// Delete the lock only if `handle.holder` still owns it
    ///
    /// Returns `Ok(false)` when the lock was already gone or taken over.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the delete fails.
    fn release(&self, handle: &LockHandle) -> Result<bool, MigrationError>;

    /// Push `expires_at` to `now + ttl` if `handle.holder` still owns the lock
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockLost` if the lock expired and was taken over or
    /// removed, or `MigrationError::Database`.
    fn extend(&self, handle: &LockHandle, ttl: Duration) -> Result<LockHandle, MigrationError>;

    /// Current lock document, expired or not
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the read fails.
    fn current(&self, name: &str) -> Result<Option<LockInfo>, MigrationError>;

    /// Create whatever storage the coordinator needs before its first acquire
    ///
    /// Idempotent; the default does nothing.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the storage cannot be created.
    fn initialize_locks(&self) -> Result<(), MigrationError> {
        Ok(())
    }
}

/// Lock guard that releases the lock when dropped
///
/// Call [`release`](Self::release) on the normal path to observe the outcome; the
/// `Drop` impl is the fallback for early returns and panics. The lease can be
/// renewed through a shared reference, so a running step can keep it alive via
/// [`SchemaManager::renew_lease`](crate::migration::SchemaManager::renew_lease).
pub struct MigrationLockGuard<'a> {
    coordinator: &'a dyn LockCoordinator,
    handle: Mutex<Option<LockHandle>>,
    ttl: Duration,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the lock and wrap it in a guard
    ///
    /// # Errors
    ///
    /// Propagates the coordinator's acquisition error.
    pub fn acquire(
        coordinator: &'a dyn LockCoordinator,
        ctx: &MigrationContext,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Self, MigrationError> {
        let handle = coordinator.acquire(ctx, name, holder, ttl)?;
        log::debug!(
            target: "tidemark::lock",
            lock = handle.name.as_str(), holder = handle.holder.as_str();
            "acquired lock '{}' until {}", handle.name, handle.expires_at
        );
        Ok(Self {
            coordinator,
            handle: Mutex::new(Some(handle)),
            ttl,
        })
    }

    /// Snapshot of the current lease
    pub fn handle(&self) -> Option<LockHandle> {
        self.slot().clone()
    }

    /// Extend the lease by the guard's TTL
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockLost` if this holder no longer owns the lock.
    pub fn extend(&self) -> Result<(), MigrationError> {
        let mut slot = self.slot();
        if let Some(handle) = slot.as_ref() {
            let renewed = self.coordinator.extend(handle, self.ttl)?;
            log::trace!(
                target: "tidemark::lock",
                lock = renewed.name.as_str();
                "extended lock '{}' until {}", renewed.name, renewed.expires_at
            );
            *slot = Some(renewed);
        }
        Ok(())
    }

    /// Release the lock now
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the delete fails.
    pub fn release(self) -> Result<bool, MigrationError> {
        match self.take() {
            Some(handle) => self.coordinator.release(&handle),
            None => Ok(false),
        }
    }

    // A panic while holding the slot only poisons the lease snapshot, never the lock record
    fn slot(&self) -> MutexGuard<'_, Option<LockHandle>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self) -> Option<LockHandle> {
        self.slot().take()
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.take() {
            if let Err(e) = self.coordinator.release(&handle) {
                log::warn!(
                    target: "tidemark::lock",
                    lock = handle.name.as_str();
                    "failed to release lock '{}': {}", handle.name, e
                );
            }
        }
    }
}
