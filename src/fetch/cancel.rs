//! Cooperative cancellation for remote calls
//!
//! A [`CancelToken`] is checked by the fetch pipeline between jobs and by
//! [`MailService`](super::MailService) implementations during a request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use crate::{Error, Result};

/// Cancellation signal shared between a caller and in-flight remote calls.
///
/// Clones share the same flag, so cancelling any clone cancels them all. A
/// token may also carry a deadline, after which it reports itself cancelled
/// without anyone calling [`cancel`](Self::cancel).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Token with a deadline no later than `timeout` from now.
    ///
    /// The child shares this token's flag rather than owning one: cancelling
    /// the child cancels the parent and every other clone, and the reverse.
    /// Only the deadline is narrowed.
    pub fn child_with_deadline(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `Err(Error::Cancelled)` once the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_timeout_expires() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        assert!(!token.is_cancelled());
        std::thread::sleep(Duration::from_millis(40));
        assert!(token.is_cancelled());
        assert_eq!(token.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_child_keeps_earlier_deadline_and_parent_flag() {
        let parent = CancelToken::with_timeout(Duration::from_millis(50));
        let child = parent.child_with_deadline(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.child_with_deadline(Duration::from_millis(1));
        assert!(tighter.deadline() < parent.deadline());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_reaches_parent() {
        let parent = CancelToken::new();
        let child = parent.child_with_deadline(Duration::from_secs(60));
        child.cancel();
        assert!(parent.is_cancelled());
    }
}
