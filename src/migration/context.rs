//! Cancellation and deadline context for migration runs

use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a [`MigrationContext`] stopped admitting work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on the context or one of its parents
    Cancelled,
    /// The deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "context cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelReason {}

/// Carries the caller's deadline and cancellation signal into a migration run
///
/// The migrator checks the context before every step and passes it to each
/// `apply`/`revert`. Long-running migrations should call [`check`](Self::check)
/// between batches. Clones share the same cancellation token.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::background()
    }
}

impl MigrationContext {
    /// A context with no deadline that is only done when cancelled
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now
    ///
    /// A timeout too large to represent as an `Instant` means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context cancelled together with `self`, with an optional tighter deadline
    ///
    /// Cancelling the child does not cancel the parent.
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout.and_then(|t| Instant::now().checked_add(t))) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while the context still admits work
    ///
    /// # Errors
    ///
    /// Returns the [`CancelReason`] once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<(), CancelReason> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_context_is_live() {
        let ctx = MigrationContext::background();
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_none());
        assert_eq!(ctx.check(), Ok(()));
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let ctx = MigrationContext::background();
        let clone = ctx.clone();
        clone.cancel();
        assert_eq!(ctx.check(), Err(CancelReason::Cancelled));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = MigrationContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.reason(), Some(CancelReason::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_child_follows_parent_cancellation_only() {
        let parent = MigrationContext::with_timeout(Duration::from_secs(60));
        let child = parent.child(Some(Duration::from_secs(1)));
        assert!(child.deadline() < parent.deadline());

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());

        let second = parent.child(None);
        assert_eq!(second.deadline(), parent.deadline());
        parent.cancel();
        assert_eq!(second.check(), Err(CancelReason::Cancelled));
    }

    #[test]
    fn test_unrepresentable_timeout_means_no_deadline() {
        let ctx = MigrationContext::with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_done());

        let bounded = MigrationContext::with_timeout(Duration::from_secs(60));
        let child = bounded.child(Some(Duration::MAX));
        assert_eq!(child.deadline(), bounded.deadline());
        assert!(ctx.child(Some(Duration::from_secs(u64::MAX))).deadline().is_none());
    }
}
