//! Call context - cancellation and deadline propagation
//!
//! Every tool call and job carries a [`CallContext`]. Cancellation is
//! cooperative: a context never kills the work it is attached to, it only
//! signals it. [`CallContext::run`] is the one place where a future is raced
//! against the context and dropped when the context fires.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    created_at: Instant,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// Create a root context with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wrap an existing cancellation token
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            created_at: Instant::now(),
        }
    }

    /// Derive a child context whose deadline is at most `timeout` from now
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context with the given deadline.
    ///
    /// An earlier parent deadline always wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        match self.deadline {
            Some(existing) if existing < deadline => self.child(),
            _ => Self {
                token: self.token.child_token(),
                deadline: Some(deadline),
                created_at: Instant::now(),
            },
        }
    }

    /// Derive a child context that inherits the deadline and its budget.
    ///
    /// Cancelling the child does not cancel the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            created_at: self.created_at,
        }
    }

    /// Underlying cancellation token
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The deadline, if one is set
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the context is done and returns the reason.
    ///
    /// Never resolves for an uncancelled context without a deadline.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Error::Cancelled,
                    _ = sleep_until(deadline) => Error::Timeout(self.budget_ms()),
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }

    /// Run `fut` until it completes or the context is done
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            result = fut => result,
            reason = self.done() => Err(reason),
        }
    }

    fn budget_ms(&self) -> u64 {
        self.deadline
            .map(|d| d.saturating_duration_since(self.created_at).as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout(50))));
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = CallContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.done().await, Error::Cancelled));
    }

    #[test]
    fn test_child_cancel_does_not_cancel_parent() {
        let parent = CallContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_parent_deadline_wins() {
        let parent = CallContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert!(child.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_reports_parent_budget() {
        let parent = CallContext::new().with_timeout(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;

        let child = parent.child();
        let result: Result<()> = child.run(std::future::pending()).await;
        assert!(matches!(result, Err(Error::Timeout(100))));

        let narrowed = parent.with_timeout(Duration::from_secs(5));
        assert!(matches!(narrowed.done().await, Error::Timeout(100)));
    }

    #[tokio::test]
    async fn test_run_returns_result_when_not_done() {
        let ctx = CallContext::new();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(ctx.deadline().is_none());
    }
}
