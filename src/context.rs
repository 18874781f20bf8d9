//! Deadline and cancellation carried by every database operation.

use crate::driver::DriverError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const MIN_TIME_LIMIT: Duration = Duration::from_millis(1);

/// Scope of a logical unit of work.
///
/// Clones and children share one cancellation flag, so cancelling any of them cancels
/// the whole tree. A child never extends its parent's deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context with no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline), cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Derives a context that expires after `timeout` or at the parent's deadline,
    /// whichever comes first.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self { deadline: Some(deadline), cancelled: Arc::clone(&self.cancelled) }
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Server-side time limit for a command issued now: the remaining time, never below
    /// one millisecond. A limit of zero would mean "unbounded" to the server.
    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.remaining().map(|left| left.max(MIN_TIME_LIMIT))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// # Errors
    /// `Cancelled` after `cancel`, `Timeout` once the deadline has passed.
    pub fn check(&self) -> Result<(), DriverError> {
        if self.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        if self.is_expired() {
            return Err(DriverError::Timeout);
        }
        Ok(())
    }
}
