//! Cancellable execution context threaded through every adapter call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ContainerError, ContainerResult};

/// Cancellation and deadline scope of one management operation.
///
/// Cloning shares the token: cancelling any clone cancels them all.
/// [`Context::child`] derives a scope that is cancelled with its parent
/// but can also be cancelled on its own.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child scope. The child keeps the parent's deadline unless
    /// `timeout` is shorter.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast when the scope is already cancelled or expired.
    pub fn check(&self, op: &str) -> ContainerResult<()> {
        if self.is_cancelled() {
            return Err(ContainerError::Cancelled(op.to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ContainerError::DeadlineExceeded(op.to_string()));
        }
        Ok(())
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// The future is dropped as soon as either fires, so an in-flight
    /// remote call is abandoned rather than awaited.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> ContainerResult<T>
    where
        F: Future<Output = ContainerResult<T>>,
    {
        self.check(op)?;

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(op, "call cancelled");
                Err(ContainerError::Cancelled(op.to_string()))
            }
            _ = expired => {
                debug!(op, "call deadline exceeded");
                Err(ContainerError::DeadlineExceeded(op.to_string()))
            }
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_runs_to_completion() {
        let ctx = Context::background();
        let v = ctx.run("op", async { Ok(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let ctx = Context::background();
        ctx.cancel();
        let err = ctx.run("op", async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ContainerError::Cancelled(op) if op == "op"));
    }

    #[tokio::test]
    async fn cancelled_during_call() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::Cancelled(_)));
    }

    #[tokio::test]
    async fn deadline_exceeded() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = Context::background();
        let child = parent.child(None);
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.check("op").is_err());
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent() {
        let parent = Context::background();
        let child = parent.child(Some(Duration::from_secs(1)));
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.deadline().is_some());
        assert!(parent.deadline().is_none());
    }
}
