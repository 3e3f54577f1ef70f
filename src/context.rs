//! Per-request cancellation and deadlines.
//!
//! A [`RequestContext`] travels with every [`Request`](crate::message::Request). It combines an explicit
//! cancellation token with an optional deadline, and is the only thing that bounds how long a caller waits on a
//! connection.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Cancellation and deadline scope for a single request.
///
/// Cloning a context is cheap, and clones observe the same cancellation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a context which is never cancelled and has no deadline.
    pub fn background() -> Self {
        RequestContext::default()
    }

    /// Creates a context which expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        RequestContext::with_deadline(Instant::now() + timeout)
    }

    /// Creates a context which expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        RequestContext {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Creates a context which is cancelled when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        RequestContext {
            token,
            deadline: None,
        }
    }

    /// Derives a child context.
    ///
    /// The child is cancelled with its parent, and its deadline is the earlier of the parent's and `timeout` from
    /// now.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout.map(|timeout| Instant::now() + timeout)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        RequestContext {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is done, or `None` if it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes when the context is cancelled or its deadline elapses.
    ///
    /// Explicit cancellation wins if both have happened. A context that is already done completes on the first poll.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn background_context_is_never_done() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.err(), None);
        assert!(
            tokio::time::timeout(Duration::from_millis(10), ctx.done())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn expired_deadline_reports_deadline_exceeded() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn expired_context_is_done_on_first_poll() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        let mut done = tokio_test::task::spawn(ctx.done());
        tokio_test::assert_ready_eq!(done.poll(), ContextError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn cancellation_wins_over_deadline() {
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn child_follows_parent_cancellation_and_earliest_deadline() {
        let parent = RequestContext::with_timeout(Duration::from_secs(60));
        let child = parent.child(Some(Duration::from_secs(3600)));
        assert_eq!(child.deadline(), parent.deadline());

        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }
}
