//! Task context: cancellation plus an optional deadline.
//!
//! Every suspension point (rate-limit waits, collaborator calls, animation
//! sleeps) runs under a `TaskContext`. Contexts form a tree rooted at the
//! process-wide shutdown token, so cancelling the root reaches every
//! in-flight wait within one scheduling step.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Cancellation scope for one unit of work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    /// Create a context bound to `root` with no deadline.
    pub fn new(root: &CancellationToken) -> Self {
        Self {
            token: root.child_token(),
            deadline: None,
        }
    }

    /// A context that is never cancelled from outside. Used by tests and
    /// one-off tooling.
    pub fn detached() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child context that also expires after `timeout`.
    ///
    /// The child never outlives its parent's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context sharing this one's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            return Err(Cancelled::Shutdown);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Cancelled::Deadline);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the context is cancelled, or the
    /// deadline passes. `fut` is dropped on cancellation.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled::Shutdown),
            _ = deadline => Err(Cancelled::Deadline),
            out = fut => Ok(out),
        }
    }

    /// Drive `fut` bounded only by the deadline. Cancellation is ignored so
    /// an already-issued call can finish inside the shutdown grace period.
    pub async fn run_to_deadline<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        match self.deadline {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| Cancelled::Deadline),
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_completes_before_deadline() {
        let ctx = TaskContext::detached().with_timeout(Duration::from_secs(1));
        let out = ctx.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn run_hits_deadline() {
        let ctx = TaskContext::detached().with_timeout(Duration::from_millis(100));
        let out = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(out, Err(Cancelled::Deadline));
    }

    #[tokio::test]
    async fn root_cancel_reaches_children() {
        let root = CancellationToken::new();
        let ctx = TaskContext::new(&root).with_timeout(Duration::from_secs(60));
        let grandchild = ctx.child();
        root.cancel();
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.check(), Err(Cancelled::Shutdown));
        let out = grandchild.run(std::future::pending::<()>()).await;
        assert_eq!(out, Err(Cancelled::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn child_keeps_earlier_deadline() {
        let parent = TaskContext::detached().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(30));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
