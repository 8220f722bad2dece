//! Cancellation and deadline context for store calls.
//!
//! # Responsibility
//! - Let callers bound how long a commit or query may run.
//! - Let another thread abort an in-flight commit.
//!
//! # Invariants
//! - A context never becomes live again once it reports an error.
//! - Cloned contexts share one cancellation flag.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a context stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// `CancelHandle::cancel` was called.
    Cancelled,
    /// The context deadline has passed.
    DeadlineExceeded,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl Error for ContextError {}

/// Cancellation and deadline scope handed to `commit` and store queries.
#[derive(Debug, Clone)]
pub struct CommitContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Handle that cancels every clone of the context it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CommitContext {
    /// Context with no deadline that is only cancelled explicitly.
    pub fn background() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Context that expires after `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Returns a child context sharing the cancellation flag, with the
    /// earlier of the current and the given deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Returns the reason this context is done, if it is.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while the context is live.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}

impl Default for CommitContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommitContext, ContextError};
    use std::time::{Duration, Instant};

    #[test]
    fn background_context_is_live() {
        let ctx = CommitContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_is_visible_to_clones() {
        let ctx = CommitContext::background();
        let clone = ctx.clone();
        ctx.cancel_handle().cancel();
        assert_eq!(clone.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn expired_deadline_reports_deadline_exceeded() {
        let ctx = CommitContext::background().deadline_at(Instant::now());
        assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
    }

    #[test]
    fn deadline_at_keeps_the_earlier_deadline() {
        let ctx = CommitContext::with_timeout(Duration::from_millis(10));
        let earlier = ctx.deadline().unwrap();
        let ctx = ctx.deadline_at(earlier + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(earlier));
    }

    #[test]
    fn cancellation_wins_over_deadline() {
        let ctx = CommitContext::background().deadline_at(Instant::now());
        ctx.cancel_handle().cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }
}
